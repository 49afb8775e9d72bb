use archprobe_core::{
    Aspect, Column, ComputeBackend, Environment, KernelArg, NdRange, ProbeError, Value,
};

use super::{kernel, start_niter, us_per_dispatch};
use crate::backend::HostBackend;
use crate::kernels::FMA_FLOPS_PER_LOOP;

/// Single precision multiply-add throughput.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gflops;

impl Aspect<HostBackend> for Gflops {
    fn name(&self) -> &str {
        "Gflops"
    }

    fn deps(&self) -> &[&str] {
        &["Timing"]
    }

    fn run(&mut self, env: &mut Environment<HostBackend>) -> Result<bool, ProbeError> {
        let nloop = env.cfg_num("nloop", 1024u32)?.max(1);
        let nitem = env.cfg_num("nitem", 64usize)?.max(1);
        let min_time_us = env.cfg_num("minTimeUs", 1000.0f64)?;
        env.init_table([
            Column::int("nitem"),
            Column::int("nloop"),
            Column::float("gflops"),
        ])?;

        let mut fma = kernel(env, "fma_f32")?;
        env.set_arg(&mut fma, 0, KernelArg::F32(0.999))?;
        env.set_arg(&mut fma, 1, KernelArg::U32(nloop))?;
        let global = NdRange::d1(nitem);
        let niter = start_niter(env, nitem as u64 * u64::from(nloop))?;
        env.ensure_min_niter(min_time_us, niter, |backend, niter| {
            backend.bench_kernel(&fma, NdRange::d1(1), global, niter)
        })?;

        let us = us_per_dispatch(env);
        let flops = nitem as f64 * f64::from(nloop) * FMA_FLOPS_PER_LOOP as f64;
        let gflops = if us > 0.0 { flops / us / 1.0e3 } else { 0.0 };
        log::info!("fp32 throughput {gflops:.2} GFLOPS ({nitem} items x {nloop} loops)");
        env.table()?.push_row([
            Value::from(nitem),
            Value::from(nloop),
            Value::Float(gflops),
        ])?;
        env.my_report_mut().gflops_fp32 = gflops;
        env.report_value("gflopsFp32", gflops)?;
        Ok(gflops > 0.0)
    }

    fn restore(&self, env: &mut Environment<HostBackend>) -> Result<(), ProbeError> {
        env.my_report_mut().gflops_fp32 = env.must_get_aspect_report(self.name(), "gflopsFp32")?;
        Ok(())
    }
}
