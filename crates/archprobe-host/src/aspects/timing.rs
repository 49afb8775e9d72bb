use archprobe_core::{Aspect, ComputeBackend, Environment, ProbeError};

use super::{kernel, us_per_dispatch, SINGLE};
use crate::backend::HostBackend;

/// Dispatch overhead and timing stability of the device.
///
/// Reports the iteration count later aspects start from (`niter`) and the
/// relative standard deviation it converged to (`timingStd`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Timing;

impl Aspect<HostBackend> for Timing {
    fn name(&self) -> &str {
        "Timing"
    }

    fn run(&mut self, env: &mut Environment<HostBackend>) -> Result<bool, ProbeError> {
        let min_time_us = env.cfg_num("minTimeUs", 1000.0f64)?;
        let noop = kernel(env, "noop")?;
        let niter = env.ensure_min_niter(min_time_us, 1, |backend, niter| {
            backend.bench_kernel(&noop, SINGLE, SINGLE, niter)
        })?;
        let converged = env
            .last_convergence()
            .map(|outcome| outcome.converged)
            .unwrap_or(false);
        if !converged {
            log::warn!("dispatch timing did not settle; later aspects may be noisy");
        }
        let timing_std = env.my_report().timing_std;
        env.report_value("niter", niter)?;
        env.report_value("timingStd", timing_std)?;
        env.report_value("usPerDispatch", us_per_dispatch(env))?;
        env.report_value("converged", converged)?;
        Ok(true)
    }

    fn restore(&self, env: &mut Environment<HostBackend>) -> Result<(), ProbeError> {
        env.my_report_mut().timing_std = env.must_get_aspect_report(self.name(), "timingStd")?;
        Ok(())
    }
}
