use archprobe_core::{
    Aspect, Column, ComputeBackend, Environment, ErrorInfo, KernelArg, MemFlags, ProbeError,
    Value,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{kernel, start_niter, us_per_dispatch, SINGLE};
use crate::backend::HostBackend;
use crate::kernels::write_word;

/// Buffer cache levels found from a pointer-chase latency sweep.
///
/// Each range is walked through a randomly ordered cyclic chain with one link
/// per cache line, so the hardware prefetcher cannot hide misses. A level
/// boundary is recorded wherever the latency of a range exceeds the previous
/// one by the configured `threshold` ratio.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferCacheHierarchy;

impl Aspect<HostBackend> for BufferCacheHierarchy {
    fn name(&self) -> &str {
        "BufferCacheHierarchy"
    }

    fn deps(&self) -> &[&str] {
        &["Timing"]
    }

    fn run(&mut self, env: &mut Environment<HostBackend>) -> Result<bool, ProbeError> {
        let cacheline = env.dev_report().buf_cacheline_size;
        let stride = (env.cfg_num("stride", cacheline)?.max(4) / 4) * 4;
        let range_min = env.cfg_num("rangeMin", 1024usize)?.max(2 * stride);
        let range_max = env
            .cfg_num("rangeMax", 32usize * 1024 * 1024)?
            .min(env.dev_report().buf_size_max);
        let nstep = env.cfg_num("nstep", 4096u32)?.max(1);
        let threshold = env.cfg_num("threshold", 1.5f64)?;
        let seed = env.cfg_num("seed", 0x5eedu64)?;
        let min_time_us = env.cfg_num("minTimeUs", 1000.0f64)?;
        env.init_table([Column::int("range"), Column::float("latencyNs")])?;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut ptr_chase = kernel(env, "ptr_chase")?;
        let mut sweep: Vec<(usize, f64)> = Vec::new();
        let mut range = range_min;
        while range <= range_max {
            let nline = range / stride;
            let mut order: Vec<usize> = (1..nline).collect();
            order.shuffle(&mut rng);

            let buf = env.create_buf(MemFlags::read_write(), range)?;
            env.map_buf(&buf, |data| write_chain(data, &order, stride))??;
            env.set_arg(&mut ptr_chase, 0, KernelArg::Buffer(&buf))?;
            env.set_arg(&mut ptr_chase, 1, KernelArg::U32(nstep))?;

            let niter = start_niter(env, u64::from(nstep))?;
            env.ensure_min_niter(min_time_us, niter, |backend, niter| {
                backend.bench_kernel(&ptr_chase, SINGLE, SINGLE, niter)
            })?;
            let latency_ns = us_per_dispatch(env) * 1.0e3 / f64::from(nstep);
            env.table()?
                .push_row([Value::from(range), Value::Float(latency_ns)])?;
            sweep.push((range, latency_ns));

            match range.checked_mul(2) {
                Some(next) => range = next,
                None => break,
            }
        }

        let sizes = cache_levels(&sweep, threshold);
        if sizes.is_empty() {
            log::warn!("no latency jump above {threshold}x found in {} ranges", sweep.len());
        }
        let report = env.my_report_mut();
        report.buf_cacheline_size = stride as u32;
        report.buf_cache_sizes = sizes.clone();
        env.report_value("cachelineSize", stride)?;
        env.report_value("cacheSizes", sizes)?;
        Ok(!sweep.is_empty())
    }

    fn restore(&self, env: &mut Environment<HostBackend>) -> Result<(), ProbeError> {
        let cacheline = env.must_get_aspect_report(self.name(), "cachelineSize")?;
        let sizes = env.must_get_aspect_report(self.name(), "cacheSizes")?;
        let report = env.my_report_mut();
        report.buf_cacheline_size = cacheline;
        report.buf_cache_sizes = sizes;
        Ok(())
    }
}

/// Writes a cyclic chain visiting line 0 then every line of `order`, one link
/// per `stride` bytes.
pub(crate) fn write_chain(data: &mut [u8], order: &[usize], stride: usize) -> Result<(), ProbeError> {
    let word = |line: usize| line * stride / 4;
    let mut cur = 0;
    for &next in order.iter().chain(std::iter::once(&0)) {
        let link = u32::try_from(word(next)).ok();
        link.and_then(|link| write_word(data, word(cur), link))
            .ok_or_else(|| {
                ProbeError::Backend(
                    ErrorInfo::new("chain_out_of_range", "pointer chain does not fit the buffer")
                        .with_context("line", cur.to_string())
                        .with_context("stride", stride.to_string())
                        .with_context("buffer_bytes", data.len().to_string()),
                )
            })?;
        cur = next;
    }
    Ok(())
}

/// Ranges right before each latency jump of at least `threshold` times.
pub(crate) fn cache_levels(sweep: &[(usize, f64)], threshold: f64) -> Vec<u32> {
    sweep
        .windows(2)
        .filter(|pair| pair[0].1 > 0.0 && pair[1].1 >= pair[0].1 * threshold)
        .map(|pair| u32::try_from(pair[0].0).unwrap_or(u32::MAX))
        .collect()
}
