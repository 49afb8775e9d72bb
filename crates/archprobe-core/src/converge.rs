//! Adaptive iteration-count driver.
//!
//! A timed workload is sampled in rounds. Each round calls the workload
//! [`ConvergencePolicy::samples_per_round`] times with the same iteration
//! count and computes the relative standard deviation of the samples. The
//! iteration count only ever grows:
//!
//! - below the minimum time, by the shortfall ratio rounded up, clamped to
//!   `[growth_factor, max_growth_factor]`;
//! - long enough but noisy, by `growth_factor`.
//!
//! The driver gives up after `max_rounds`, once the count saturates at
//! `u32::MAX`, or when `wall_budget` is spent. Growth is capped so the
//! projected cost of the next round fits the remaining wall-clock budget;
//! when not even doubling fits, the driver stops.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, ProbeError};

/// Stopping and growth parameters of [`ensure_min_niter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergencePolicy {
    /// Largest accepted relative standard deviation.
    pub rsd_threshold: f64,
    /// Timing samples taken per round.
    pub samples_per_round: usize,
    /// Growth applied when the workload is long enough but noisy.
    pub growth_factor: u32,
    /// Upper clamp of the growth applied in one round.
    pub max_growth_factor: u32,
    /// Rounds after which the driver gives up.
    pub max_rounds: u32,
    /// Wall-clock ceiling over all rounds.
    pub wall_budget: Duration,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            rsd_threshold: 0.05,
            samples_per_round: 5,
            growth_factor: 2,
            max_growth_factor: 64,
            max_rounds: 24,
            wall_budget: Duration::from_secs(30),
        }
    }
}

/// Outcome of [`ensure_min_niter`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Convergence {
    /// Final iteration count; never below the requested one.
    pub niter: u32,
    /// Mean elapsed time of the last round in microseconds.
    pub mean_us: f64,
    /// Relative standard deviation of the last round.
    pub rsd: f64,
    /// Rounds sampled.
    pub rounds: u32,
    /// False when a budget ran out before the stopping rule held.
    pub converged: bool,
}

/// Grows `niter` until `run(niter)` takes at least `min_time_us` and its
/// timing is stable.
///
/// `run` executes the workload `niter` times and returns the elapsed time in
/// microseconds.
pub fn ensure_min_niter<F>(
    policy: &ConvergencePolicy,
    min_time_us: f64,
    niter: u32,
    mut run: F,
) -> Result<Convergence, ProbeError>
where
    F: FnMut(u32) -> Result<f64, ProbeError>,
{
    let started = Instant::now();
    let samples_per_round = policy.samples_per_round.max(1);
    let growth = policy.growth_factor.max(2);
    let max_growth = policy.max_growth_factor.max(growth);
    let mut niter = niter.max(1);
    let mut rounds = 0u32;
    let mut samples = Vec::with_capacity(samples_per_round);

    loop {
        rounds += 1;
        samples.clear();
        for _ in 0..samples_per_round {
            let elapsed = run(niter)?;
            if !elapsed.is_finite() || elapsed < 0.0 {
                return Err(ProbeError::Measurement(
                    ErrorInfo::new("timing_invalid", "workload reported an invalid duration")
                        .with_context("elapsed_us", elapsed.to_string())
                        .with_context("niter", niter.to_string()),
                ));
            }
            samples.push(elapsed);
        }
        let (mean, std) = mean_std(&samples);
        let rsd = if mean > 0.0 { std / mean } else { 0.0 };
        let long_enough = mean >= min_time_us;
        let outcome = Convergence {
            niter,
            mean_us: mean,
            rsd,
            rounds,
            converged: long_enough && rsd <= policy.rsd_threshold,
        };
        if outcome.converged {
            log::info!(
                "found minimal niter={niter} to take {min_time_us}us \
                 (mean={mean:.3}us, rsd={rsd:.4}, rounds={rounds})"
            );
            return Ok(outcome);
        }
        if rounds >= policy.max_rounds
            || started.elapsed() >= policy.wall_budget
            || niter == u32::MAX
        {
            log::warn!(
                "timing did not converge after {rounds} rounds \
                 (niter={niter}, mean={mean:.3}us, rsd={rsd:.4}); using the last niter"
            );
            return Ok(outcome);
        }

        let mut factor = if !long_enough {
            if mean > 0.0 {
                ((min_time_us / mean).ceil() as u64).clamp(growth as u64, max_growth as u64) as u32
            } else {
                max_growth
            }
        } else {
            growth
        };
        // Rounds scale linearly with niter; keep the next one inside the budget.
        let round_us = samples_per_round as f64 * mean;
        if round_us > 0.0 {
            let remaining_us = policy.wall_budget.saturating_sub(started.elapsed()).as_secs_f64() * 1e6;
            let fit = (remaining_us / round_us).floor();
            if fit < 2.0 {
                log::warn!(
                    "timing did not converge before the wall budget ran out \
                     (niter={niter}, mean={mean:.3}us, rsd={rsd:.4}); using the last niter"
                );
                return Ok(outcome);
            }
            factor = factor.min(fit.min(u32::MAX as f64) as u32);
        }
        log::debug!(
            "niter={niter} is not good enough (mean={mean:.3}us, rsd={rsd:.4}), growing by {factor}"
        );
        niter = niter.saturating_mul(factor);
    }
}

/// Mean and sample standard deviation.
pub fn mean_std(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    if samples.len() < 2 {
        return (mean, 0.0);
    }
    let var = samples
        .iter()
        .map(|sample| (sample - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    (mean, var.sqrt())
}
