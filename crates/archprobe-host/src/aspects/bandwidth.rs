use archprobe_core::{
    Aspect, Column, ComputeBackend, Environment, ErrorInfo, KernelArg, MemFlags, ProbeError,
    Value,
};

use super::{kernel, start_niter, us_per_dispatch, SINGLE};
use crate::backend::HostBackend;

/// Sequential read bandwidth over buffers of doubling size.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferBandwidth;

impl Aspect<HostBackend> for BufferBandwidth {
    fn name(&self) -> &str {
        "BufferBandwidth"
    }

    fn deps(&self) -> &[&str] {
        &["Timing"]
    }

    fn run(&mut self, env: &mut Environment<HostBackend>) -> Result<bool, ProbeError> {
        let range_min = env.cfg_num("rangeMin", 64usize * 1024)?.max(4);
        let range_max = env
            .cfg_num("rangeMax", 64usize * 1024 * 1024)?
            .min(env.dev_report().buf_size_max);
        let min_time_us = env.cfg_num("minTimeUs", 1000.0f64)?;
        env.init_table([
            Column::int("range"),
            Column::int("niter"),
            Column::float("usPerDispatch"),
            Column::float("bandwidthGBps"),
        ])?;

        let mut read_sum = kernel(env, "read_sum")?;
        let mut peak = 0.0f64;
        let mut range = range_min;
        while range <= range_max {
            let nword = u32::try_from(range / 4).map_err(|_| {
                ProbeError::Measurement(
                    ErrorInfo::new("range_too_large", "read range does not fit a 32-bit count")
                        .with_context("range", range.to_string()),
                )
            })?;
            let buf = env.create_buf(MemFlags::read_only(), range)?;
            env.map_buf(&buf, |data| {
                for (i, byte) in data.iter_mut().enumerate() {
                    *byte = i as u8;
                }
            })?;
            env.set_arg(&mut read_sum, 0, KernelArg::Buffer(&buf))?;
            env.set_arg(&mut read_sum, 1, KernelArg::U32(nword))?;

            let niter = start_niter(env, u64::from(nword))?;
            let niter = env.ensure_min_niter(min_time_us, niter, |backend, niter| {
                backend.bench_kernel(&read_sum, SINGLE, SINGLE, niter)
            })?;
            let us = us_per_dispatch(env);
            let gbps = if us > 0.0 { range as f64 / us / 1.0e3 } else { 0.0 };
            log::info!("read {range} bytes at {gbps:.2} GB/s (niter={niter})");
            env.table()?.push_row([
                Value::from(range),
                Value::from(niter),
                Value::Float(us),
                Value::Float(gbps),
            ])?;
            peak = peak.max(gbps);

            match range.checked_mul(2) {
                Some(next) => range = next,
                None => break,
            }
        }

        if peak == 0.0 {
            log::warn!("no buffer range between {range_min} and {range_max} bytes was measured");
            return Ok(false);
        }
        env.my_report_mut().buf_bandwidth = peak;
        env.report_value("bandwidthGBps", peak)?;
        Ok(true)
    }

    fn restore(&self, env: &mut Environment<HostBackend>) -> Result<(), ProbeError> {
        env.my_report_mut().buf_bandwidth = env.must_get_aspect_report(self.name(), "bandwidthGBps")?;
        Ok(())
    }
}
