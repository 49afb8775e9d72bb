#![allow(dead_code)]

use std::cell::RefCell;
use std::path::Path;

use archprobe_core::{
    ComputeBackend, ConvergencePolicy, DeviceReport, EnvOpts, Environment, ImageFormat, KernelArg,
    MemFlags, NdRange, ProbeError,
};

/// Backend whose kernels take a fixed time per iteration.
pub struct FakeBackend {
    pub per_iter_us: f64,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self { per_iter_us: 1.0 }
    }
}

pub fn fake_device() -> DeviceReport {
    DeviceReport {
        name: "fake".into(),
        page_size: Some(4096),
        buf_cacheline_size: 64,
        buf_size_max: 1 << 30,
        buf_cache_size: 1 << 20,
        support_img: true,
        img_width_max: 16384,
        img_height_max: 16384,
        nsm: 4,
        nthread_logic: 1024,
    }
}

impl ComputeBackend for FakeBackend {
    type Program = String;
    type Kernel = String;
    type Buffer = RefCell<Vec<u8>>;
    type Image1D = RefCell<Vec<u8>>;
    type Image2D = RefCell<Vec<u8>>;

    fn device_report(&self) -> Result<DeviceReport, ProbeError> {
        Ok(fake_device())
    }

    fn create_program(&self, src: &str, _build_opts: &str) -> Result<String, ProbeError> {
        Ok(src.to_string())
    }

    fn create_program_binary(&self, binary: &[u8], _build_opts: &str) -> Result<String, ProbeError> {
        Ok(String::from_utf8_lossy(binary).into_owned())
    }

    fn create_kernel(&self, _program: &String, name: &str) -> Result<String, ProbeError> {
        Ok(name.to_string())
    }

    fn set_arg(
        &self,
        _kernel: &mut String,
        _index: u32,
        _arg: KernelArg<'_, Self>,
    ) -> Result<(), ProbeError> {
        Ok(())
    }

    fn create_buf(&self, _flags: MemFlags, size: usize) -> Result<Self::Buffer, ProbeError> {
        Ok(RefCell::new(vec![0; size]))
    }

    fn create_img_1d(
        &self,
        _flags: MemFlags,
        format: ImageFormat,
        width: u32,
    ) -> Result<Self::Image1D, ProbeError> {
        Ok(RefCell::new(vec![0; format.pixel_bytes() * width as usize]))
    }

    fn create_img_2d(
        &self,
        _flags: MemFlags,
        format: ImageFormat,
        width: u32,
        height: u32,
    ) -> Result<Self::Image2D, ProbeError> {
        Ok(RefCell::new(vec![
            0;
            format.pixel_bytes() * width as usize * height as usize
        ]))
    }

    fn map_buf<R>(
        &self,
        buf: &Self::Buffer,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, ProbeError> {
        Ok(f(&mut buf.borrow_mut()))
    }

    fn map_img_1d<R>(
        &self,
        img: &Self::Image1D,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, ProbeError> {
        Ok(f(&mut img.borrow_mut()))
    }

    fn map_img_2d<R>(
        &self,
        img: &Self::Image2D,
        f: impl FnOnce(&mut [u8], usize) -> R,
    ) -> Result<R, ProbeError> {
        let mut data = img.borrow_mut();
        let pitch = data.len();
        Ok(f(&mut data, pitch))
    }

    fn bench_kernel(
        &self,
        _kernel: &String,
        _local: NdRange,
        _global: NdRange,
        niter: u32,
    ) -> Result<f64, ProbeError> {
        Ok(self.per_iter_us * niter as f64)
    }
}

pub fn opts_in(dir: &Path) -> EnvOpts {
    EnvOpts {
        config_path: dir.join("ArchProbe.json"),
        report_path: dir.join("ArchProbeReport.json"),
        convergence: ConvergencePolicy::default(),
    }
}

pub fn env_in(dir: &Path) -> Environment<FakeBackend> {
    Environment::new(FakeBackend::new(), opts_in(dir)).expect("fake environment")
}

pub fn write_report(dir: &Path, json: &str) {
    std::fs::write(dir.join("ArchProbeReport.json"), json).expect("write report");
}

pub fn read_json(path: &Path) -> serde_json::Value {
    let bytes = std::fs::read(path).expect("read document");
    serde_json::from_slice(&bytes).expect("parse document")
}
