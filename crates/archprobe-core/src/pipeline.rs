//! Fixed-order aspect pipeline.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::backend::ComputeBackend;
use crate::env::Environment;
use crate::errors::ProbeError;

/// One characterization procedure.
pub trait Aspect<B: ComputeBackend> {
    /// Unique aspect name; scopes its configuration and report.
    fn name(&self) -> &str;

    /// Aspects that must be done before this one runs.
    fn deps(&self) -> &[&str] {
        &[]
    }

    /// Measures inside an open scope. Returns whether the result is complete.
    fn run(&mut self, env: &mut Environment<B>) -> Result<bool, ProbeError>;

    /// Loads the figures of a completed report from an earlier run back into
    /// the profiled report. Called instead of [`Aspect::run`] when the aspect
    /// is skipped; an error makes the pipeline measure it again.
    fn restore(&self, _env: &mut Environment<B>) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Options governing a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    /// Aspects rerun even when a completed report exists.
    pub force: BTreeSet<String>,
    /// When set, only these aspects are run; the others are left untouched.
    pub only: Option<BTreeSet<String>>,
}

/// What happened to one aspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum AspectOutcome {
    /// A completed report from an earlier run was reused.
    Skipped,
    /// Excluded by [`RunOpts::only`].
    Filtered,
    /// Measured and marked done.
    Done,
    /// Measured but not marked done.
    Incomplete,
    /// Failed with a recoverable error; marked not done.
    Failed {
        /// Rendered error.
        error: String,
    },
}

/// Per-aspect outcomes in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// `(aspect, outcome)` pairs.
    pub aspects: Vec<(String, AspectOutcome)>,
}

impl PipelineSummary {
    /// Outcome recorded for `aspect`.
    pub fn outcome(&self, aspect: &str) -> Option<&AspectOutcome> {
        self.aspects
            .iter()
            .find(|(name, _)| name == aspect)
            .map(|(_, outcome)| outcome)
    }

    /// True when every aspect that ran was marked done.
    pub fn all_done(&self) -> bool {
        self.aspects.iter().all(|(_, outcome)| {
            matches!(
                outcome,
                AspectOutcome::Done | AspectOutcome::Skipped | AspectOutcome::Filtered
            )
        })
    }
}

/// Runs `aspects` in order.
///
/// Fatal errors stop the pipeline immediately and leave the active scope
/// open, so nothing half-measured is flushed.
pub fn run_pipeline<B: ComputeBackend>(
    env: &mut Environment<B>,
    aspects: &mut [Box<dyn Aspect<B>>],
    opts: &RunOpts,
) -> Result<PipelineSummary, ProbeError> {
    let mut summary = PipelineSummary::default();
    for aspect in aspects.iter_mut() {
        let name = aspect.name().to_string();
        if let Some(only) = &opts.only {
            if !only.contains(&name) {
                log::debug!("aspect '{name}' is not selected");
                summary.aspects.push((name, AspectOutcome::Filtered));
                continue;
            }
        }
        for dep in aspect.deps() {
            env.check_dep(dep)?;
        }
        if opts.force.contains(&name) {
            env.report_started(&name)?;
        } else if env.report_started_lazy(&name)? {
            match aspect.restore(env) {
                Ok(()) => {
                    summary.aspects.push((name, AspectOutcome::Skipped));
                    continue;
                }
                Err(err) => {
                    log::warn!("saved report of aspect '{name}' cannot be restored ({err}); measuring again");
                    env.report_started(&name)?;
                }
            }
        }

        let outcome = match aspect.run(env) {
            Ok(true) => {
                env.report_ready(true)?;
                AspectOutcome::Done
            }
            Ok(false) => {
                env.report_ready(false)?;
                AspectOutcome::Incomplete
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                log::error!("aspect '{name}' failed: {err}");
                env.report_ready(false)?;
                AspectOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        summary.aspects.push((name, outcome));
    }
    Ok(summary)
}
