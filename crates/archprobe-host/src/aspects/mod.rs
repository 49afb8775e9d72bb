use archprobe_core::{Aspect, Environment, NdRange, ProbeError};

use crate::backend::{HostBackend, HostKernel};

mod bandwidth;
mod cache;
mod gflops;
mod timing;

pub use bandwidth::BufferBandwidth;
pub use cache::BufferCacheHierarchy;
pub use gflops::Gflops;
pub use timing::Timing;

/// Single work item dispatch used by the memory aspects.
pub(crate) const SINGLE: NdRange = NdRange::d1(1);

/// Aspects in dependency order.
pub fn default_aspects() -> Vec<Box<dyn Aspect<HostBackend>>> {
    vec![
        Box::new(Timing),
        Box::new(BufferBandwidth),
        Box::new(BufferCacheHierarchy),
        Box::new(Gflops),
    ]
}

pub(crate) fn kernel(env: &Environment<HostBackend>, name: &str) -> Result<HostKernel, ProbeError> {
    let program = env.create_program(name, "")?;
    env.create_kernel(&program, name)
}

/// Starting iteration count of a kernel doing `work` noop-sized units per
/// dispatch: the count Timing settled on, divided by `work`.
pub(crate) fn start_niter(env: &Environment<HostBackend>, work: u64) -> Result<u32, ProbeError> {
    let baseline: u32 = env.must_get_aspect_report("Timing", "niter")?;
    let niter = u64::from(baseline) / work.max(1);
    Ok(u32::try_from(niter).unwrap_or(u32::MAX).max(1))
}

/// Mean microseconds of one dispatch in the last converged timing.
pub(crate) fn us_per_dispatch(env: &Environment<HostBackend>) -> f64 {
    env.last_convergence()
        .map(|outcome| outcome.mean_us / f64::from(outcome.niter.max(1)))
        .unwrap_or(0.0)
}
