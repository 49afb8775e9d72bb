//! Host CPU implementation of [`ComputeBackend`].
//!
//! Device 0 is the host itself. Memory objects are shared byte vectors so a
//! kernel can keep its bound arguments after `set_arg` returns.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

use archprobe_core::{
    ComputeBackend, DeviceReport, ErrorInfo, ImageFormat, KernelArg, MemAccess, MemFlags,
    NdRange, ProbeError,
};
use sysinfo::System;

use crate::kernels::{self, KernelKind};

const HOST_CACHELINE: usize = 64;
const HOST_IMG_MAX: u32 = 16384;
const FALLBACK_BUF_MAX: usize = 1 << 30;

/// Host buffer: shared, resizable byte storage.
#[derive(Debug, Clone)]
pub struct HostBuffer {
    data: Rc<RefCell<Vec<u8>>>,
    flags: MemFlags,
}

impl HostBuffer {
    fn new(flags: MemFlags, size: usize) -> Self {
        Self {
            data: Rc::new(RefCell::new(vec![0; size])),
            flags,
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// True for a zero-sized buffer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocation flags.
    pub fn flags(&self) -> MemFlags {
        self.flags
    }

    pub(crate) fn data(&self) -> &Rc<RefCell<Vec<u8>>> {
        &self.data
    }
}

/// Host image with a tightly packed row layout.
#[derive(Debug, Clone)]
pub struct HostImage {
    data: Rc<RefCell<Vec<u8>>>,
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl HostImage {
    /// Pixel format.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Width and height in pixels; 1D images have a height of 1.
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes per row.
    pub fn row_pitch(&self) -> usize {
        self.format.pixel_bytes() * self.width as usize
    }
}

/// Argument captured by [`HostBackend::set_arg`].
#[derive(Debug, Clone)]
pub enum HostArg {
    /// Buffer object.
    Buffer(HostBuffer),
    /// Image object.
    Image(HostImage),
    /// Unsigned scalar.
    U32(u32),
    /// Signed scalar.
    I32(i32),
    /// Float scalar.
    F32(f32),
}

/// Program holding the built-in kernels named in its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProgram {
    kernels: Vec<KernelKind>,
}

impl HostProgram {
    /// Kernels the program exposes.
    pub fn kernels(&self) -> &[KernelKind] {
        &self.kernels
    }
}

/// Kernel with its bound arguments.
#[derive(Debug, Clone)]
pub struct HostKernel {
    kind: KernelKind,
    args: BTreeMap<u32, HostArg>,
}

impl HostKernel {
    /// Which built-in kernel this is.
    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    /// Bound arguments keyed by slot.
    pub fn args(&self) -> &BTreeMap<u32, HostArg> {
        &self.args
    }
}

/// Backend running built-in kernels on the calling thread.
#[derive(Debug, Clone)]
pub struct HostBackend {
    device: DeviceReport,
}

impl HostBackend {
    /// Opens device `idev`; the host exposes a single device, index 0.
    pub fn open(idev: usize) -> Result<Self, ProbeError> {
        if idev != 0 {
            return Err(ProbeError::Backend(
                ErrorInfo::new("device_not_found", "no such device")
                    .with_context("index", idev.to_string())
                    .with_hint("the host backend exposes a single device (0)"),
            ));
        }
        let device = query_host();
        log::info!(
            "opened host device '{}' ({} physical cores, {} logical threads)",
            device.name,
            device.nsm,
            device.nthread_logic
        );
        Ok(Self { device })
    }

    /// Backend reporting the given capabilities instead of the queried ones.
    pub fn with_device(device: DeviceReport) -> Self {
        Self { device }
    }
}

fn query_host() -> DeviceReport {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();
    let name = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "host".to_string());
    let total_memory = usize::try_from(sys.total_memory()).unwrap_or(usize::MAX);
    let buf_size_max = if total_memory == 0 {
        FALLBACK_BUF_MAX
    } else {
        total_memory / 4
    };
    DeviceReport {
        name,
        page_size: None,
        buf_cacheline_size: HOST_CACHELINE,
        buf_size_max,
        buf_cache_size: 0,
        support_img: true,
        img_width_max: HOST_IMG_MAX,
        img_height_max: HOST_IMG_MAX,
        nsm: num_cpus::get_physical() as u32,
        nthread_logic: num_cpus::get() as u32,
    }
}

fn parse_program(src: &str) -> Result<HostProgram, ProbeError> {
    let kernels = src
        .split_whitespace()
        .map(|name| {
            KernelKind::from_name(name).ok_or_else(|| {
                ProbeError::Backend(
                    ErrorInfo::new("unknown_kernel", "program names an unknown kernel")
                        .with_context("kernel", name)
                        .with_hint(format!("available kernels: {}", KernelKind::names().join(", "))),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if kernels.is_empty() {
        return Err(ProbeError::Backend(ErrorInfo::new(
            "empty_program",
            "program source names no kernel",
        )));
    }
    Ok(HostProgram { kernels })
}

fn check_extent(what: &str, requested: u32, max: u32) -> Result<(), ProbeError> {
    if requested == 0 || requested > max {
        return Err(ProbeError::Backend(
            ErrorInfo::new("image_extent", "image extent out of range")
                .with_context("dimension", what)
                .with_context("requested", requested.to_string())
                .with_context("max", max.to_string()),
        ));
    }
    Ok(())
}

fn check_ranges(local: NdRange, global: NdRange) -> Result<(), ProbeError> {
    if global.size() == 0 || local.size() == 0 {
        return Err(ProbeError::Backend(ErrorInfo::new(
            "empty_range",
            "dispatch range has no work items",
        )));
    }
    let divisible = global
        .dims()
        .iter()
        .zip(local.dims())
        .all(|(g, l)| g % l == 0);
    if !divisible || local.rank() > global.rank() {
        return Err(ProbeError::Backend(
            ErrorInfo::new("range_mismatch", "local range does not tile the global range")
                .with_context("local", format!("{:?}", local.dims()))
                .with_context("global", format!("{:?}", global.dims())),
        ));
    }
    Ok(())
}

impl ComputeBackend for HostBackend {
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Buffer = HostBuffer;
    type Image1D = HostImage;
    type Image2D = HostImage;

    fn device_report(&self) -> Result<DeviceReport, ProbeError> {
        Ok(self.device.clone())
    }

    fn create_program(&self, src: &str, build_opts: &str) -> Result<HostProgram, ProbeError> {
        if !build_opts.is_empty() {
            log::debug!("host programs ignore build options '{build_opts}'");
        }
        parse_program(src)
    }

    fn create_program_binary(
        &self,
        binary: &[u8],
        build_opts: &str,
    ) -> Result<HostProgram, ProbeError> {
        let src = std::str::from_utf8(binary).map_err(|err| {
            ProbeError::Backend(
                ErrorInfo::new("binary_invalid", "program binary is not valid UTF-8")
                    .with_hint(err.to_string()),
            )
        })?;
        self.create_program(src, build_opts)
    }

    fn create_kernel(&self, program: &HostProgram, name: &str) -> Result<HostKernel, ProbeError> {
        let kind = program
            .kernels
            .iter()
            .copied()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| {
                ProbeError::Backend(
                    ErrorInfo::new("kernel_not_found", "kernel is not part of the program")
                        .with_context("kernel", name),
                )
            })?;
        Ok(HostKernel {
            kind,
            args: BTreeMap::new(),
        })
    }

    fn set_arg(
        &self,
        kernel: &mut HostKernel,
        index: u32,
        arg: KernelArg<'_, Self>,
    ) -> Result<(), ProbeError> {
        let arg = match arg {
            KernelArg::Buffer(buf) => HostArg::Buffer(buf.clone()),
            KernelArg::Image1D(img) => HostArg::Image(img.clone()),
            KernelArg::Image2D(img) => HostArg::Image(img.clone()),
            KernelArg::U32(value) => HostArg::U32(value),
            KernelArg::I32(value) => HostArg::I32(value),
            KernelArg::F32(value) => HostArg::F32(value),
        };
        kernel.args.insert(index, arg);
        Ok(())
    }

    fn create_buf(&self, flags: MemFlags, size: usize) -> Result<HostBuffer, ProbeError> {
        if size > self.device.buf_size_max {
            return Err(ProbeError::Backend(
                ErrorInfo::new("buffer_too_large", "buffer exceeds the allocation limit")
                    .with_context("requested", size.to_string())
                    .with_context("max", self.device.buf_size_max.to_string()),
            ));
        }
        Ok(HostBuffer::new(flags, size))
    }

    fn create_img_1d(
        &self,
        _flags: MemFlags,
        format: ImageFormat,
        width: u32,
    ) -> Result<HostImage, ProbeError> {
        check_extent("width", width, self.device.img_width_max)?;
        Ok(HostImage {
            data: Rc::new(RefCell::new(vec![0; format.pixel_bytes() * width as usize])),
            format,
            width,
            height: 1,
        })
    }

    fn create_img_2d(
        &self,
        _flags: MemFlags,
        format: ImageFormat,
        width: u32,
        height: u32,
    ) -> Result<HostImage, ProbeError> {
        check_extent("width", width, self.device.img_width_max)?;
        check_extent("height", height, self.device.img_height_max)?;
        let size = format.pixel_bytes() * width as usize * height as usize;
        Ok(HostImage {
            data: Rc::new(RefCell::new(vec![0; size])),
            format,
            width,
            height,
        })
    }

    fn map_buf<R>(
        &self,
        buf: &HostBuffer,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, ProbeError> {
        let mut data = buf.data.try_borrow_mut().map_err(|_| mapped_twice())?;
        Ok(f(&mut data))
    }

    fn map_img_1d<R>(
        &self,
        img: &HostImage,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, ProbeError> {
        let mut data = img.data.try_borrow_mut().map_err(|_| mapped_twice())?;
        Ok(f(&mut data))
    }

    fn map_img_2d<R>(
        &self,
        img: &HostImage,
        f: impl FnOnce(&mut [u8], usize) -> R,
    ) -> Result<R, ProbeError> {
        let pitch = img.row_pitch();
        let mut data = img.data.try_borrow_mut().map_err(|_| mapped_twice())?;
        Ok(f(&mut data, pitch))
    }

    fn bench_kernel(
        &self,
        kernel: &HostKernel,
        local: NdRange,
        global: NdRange,
        niter: u32,
    ) -> Result<f64, ProbeError> {
        check_ranges(local, global)?;
        let dispatch = kernels::prepare(kernel.kind, &kernel.args, global)?;
        let started = Instant::now();
        for _ in 0..niter {
            dispatch.run()?;
        }
        Ok(started.elapsed().as_secs_f64() * 1.0e6)
    }
}

pub(crate) fn mapped_twice() -> ProbeError {
    ProbeError::Backend(ErrorInfo::new(
        "already_mapped",
        "memory object is mapped or in use by a kernel",
    ))
}

pub(crate) fn ensure_writable(buf: &HostBuffer, slot: u32) -> Result<(), ProbeError> {
    if buf.flags.access == MemAccess::ReadOnly {
        return Err(ProbeError::Backend(
            ErrorInfo::new("read_only", "kernel writes to a read-only buffer")
                .with_context("slot", slot.to_string()),
        ));
    }
    Ok(())
}
