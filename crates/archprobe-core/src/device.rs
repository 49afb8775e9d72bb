//! Device capability and profiled result snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Capabilities queried from the backend once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    /// Human readable device name.
    pub name: String,
    /// OS memory page size, when the backend can tell.
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Cache line size of buffer accesses in bytes.
    pub buf_cacheline_size: usize,
    /// Largest single buffer allocation in bytes.
    pub buf_size_max: usize,
    /// Total cache size estimate in bytes (0 when unknown).
    pub buf_cache_size: usize,
    /// Whether image objects are supported.
    pub support_img: bool,
    /// Maximum image width in pixels.
    pub img_width_max: u32,
    /// Maximum image height in pixels.
    pub img_height_max: u32,
    /// Number of compute units.
    pub nsm: u32,
    /// Number of logical threads the device advertises.
    pub nthread_logic: u32,
}

/// Figures measured over a run; aspects fill the fields they own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfiledReport {
    /// Relative standard deviation of the last converged timing.
    pub timing_std: f64,

    /// Logical thread occupancy keyed by register count.
    pub nthread_logic_for_nreg: BTreeMap<u32, u32>,

    /// Half precision throughput in GFLOPS.
    pub gflops_fp16: f64,
    /// Single precision throughput in GFLOPS.
    pub gflops_fp32: f64,
    /// 32-bit integer throughput in GOPS.
    pub gflops_int32: f64,
    /// Minimum number of warps resident per compute unit.
    pub nmin_warp: u32,
    /// Number of warps resident per compute unit.
    pub nwarp: u32,
    /// Physical thread count per compute unit.
    pub nthread_phys: u32,
    /// Threads per warp.
    pub nthread_warp: u32,
    /// Threads in the minimal warp configuration.
    pub nthread_min_warp: u32,

    /// Preferred buffer vector width in elements.
    pub buf_vec_width: u32,
    /// Preferred buffer vector type name.
    pub buf_vec_ty: String,
    /// Measured buffer cache line size in bytes.
    pub buf_cacheline_size: u32,
    /// Buffer cache level sizes in bytes, innermost first.
    pub buf_cache_sizes: Vec<u32>,
    /// Buffer read bandwidth in GB/s.
    pub buf_bandwidth: f64,

    /// Measured image cache line size in bytes.
    pub img_cacheline_size: u32,
    /// Image cache level sizes in bytes, innermost first.
    pub img_cache_sizes: Vec<u32>,
    /// Image read bandwidth in GB/s.
    pub img_bandwidth: f64,
}

/// Formats a byte count with a binary unit suffix.
pub fn pretty_data_size(size: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut unit = 0;
    let mut whole = size;
    while unit + 1 < UNITS.len() && whole >= 1024 && whole % 1024 == 0 {
        whole /= 1024;
        unit += 1;
    }
    format!("{whole}{}", UNITS[unit])
}
