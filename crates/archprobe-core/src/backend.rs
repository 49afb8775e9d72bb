//! Compute backend contract.
//!
//! The orchestration layer never talks to a device directly; every device
//! operation goes through [`ComputeBackend`]. Handles are associated types so a
//! backend can use whatever representation its runtime hands out.

use serde::{Deserialize, Serialize};

use crate::device::DeviceReport;
use crate::errors::ProbeError;

/// Work-group shape with one to three dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdRange {
    dims: [usize; 3],
    rank: u8,
}

impl NdRange {
    /// One-dimensional range.
    pub const fn d1(x: usize) -> Self {
        Self {
            dims: [x, 1, 1],
            rank: 1,
        }
    }

    /// Two-dimensional range.
    pub const fn d2(x: usize, y: usize) -> Self {
        Self {
            dims: [x, y, 1],
            rank: 2,
        }
    }

    /// Three-dimensional range.
    pub const fn d3(x: usize, y: usize, z: usize) -> Self {
        Self {
            dims: [x, y, z],
            rank: 3,
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.rank as usize
    }

    /// Extent of every dimension; unused dimensions are 1.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Total number of work items.
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Device-side access pattern of a memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemAccess {
    /// Kernels only read.
    ReadOnly,
    /// Kernels only write.
    WriteOnly,
    /// Kernels read and write.
    ReadWrite,
}

/// Allocation flags of a memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemFlags {
    /// Device-side access.
    pub access: MemAccess,
    /// Allocate in host-visible memory so mapping is cheap.
    pub host_visible: bool,
}

impl MemFlags {
    /// Read-only, host-visible allocation.
    pub const fn read_only() -> Self {
        Self {
            access: MemAccess::ReadOnly,
            host_visible: true,
        }
    }

    /// Read-write, host-visible allocation.
    pub const fn read_write() -> Self {
        Self {
            access: MemAccess::ReadWrite,
            host_visible: true,
        }
    }
}

/// Image channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelOrder {
    /// Single channel.
    R,
    /// Four channels.
    Rgba,
}

impl ChannelOrder {
    /// Number of channels.
    pub fn channels(self) -> usize {
        match self {
            ChannelOrder::R => 1,
            ChannelOrder::Rgba => 4,
        }
    }
}

/// Image channel element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    /// 32-bit float.
    Float,
    /// 16-bit float.
    HalfFloat,
    /// 32-bit unsigned integer.
    UnsignedInt32,
}

impl ChannelType {
    /// Size of one channel element in bytes.
    pub fn bytes(self) -> usize {
        match self {
            ChannelType::Float | ChannelType::UnsignedInt32 => 4,
            ChannelType::HalfFloat => 2,
        }
    }
}

/// Pixel format of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFormat {
    /// Channel layout.
    pub order: ChannelOrder,
    /// Channel element type.
    pub ty: ChannelType,
}

impl ImageFormat {
    /// Size of one pixel in bytes.
    pub fn pixel_bytes(&self) -> usize {
        self.order.channels() * self.ty.bytes()
    }
}

/// Argument bound to a kernel parameter slot.
pub enum KernelArg<'a, B: ComputeBackend + ?Sized> {
    /// Buffer object.
    Buffer(&'a B::Buffer),
    /// 1D image object.
    Image1D(&'a B::Image1D),
    /// 2D image object.
    Image2D(&'a B::Image2D),
    /// Unsigned scalar.
    U32(u32),
    /// Signed scalar.
    I32(i32),
    /// Float scalar.
    F32(f32),
}

/// Device, compilation, memory and dispatch operations used by aspects.
pub trait ComputeBackend {
    /// Compiled program handle.
    type Program;
    /// Kernel handle with bound arguments.
    type Kernel;
    /// Buffer handle.
    type Buffer;
    /// 1D image handle.
    type Image1D;
    /// 2D image handle.
    type Image2D;

    /// Queries the capability snapshot of the opened device.
    fn device_report(&self) -> Result<DeviceReport, ProbeError>;

    /// Compiles a program from source.
    fn create_program(&self, src: &str, build_opts: &str) -> Result<Self::Program, ProbeError>;

    /// Loads a program from a device binary.
    fn create_program_binary(
        &self,
        binary: &[u8],
        build_opts: &str,
    ) -> Result<Self::Program, ProbeError>;

    /// Looks a kernel up in a compiled program.
    fn create_kernel(&self, program: &Self::Program, name: &str)
        -> Result<Self::Kernel, ProbeError>;

    /// Binds `arg` to parameter slot `index`.
    fn set_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        arg: KernelArg<'_, Self>,
    ) -> Result<(), ProbeError>;

    /// Allocates a buffer of `size` bytes.
    fn create_buf(&self, flags: MemFlags, size: usize) -> Result<Self::Buffer, ProbeError>;

    /// Allocates a 1D image.
    fn create_img_1d(
        &self,
        flags: MemFlags,
        format: ImageFormat,
        width: u32,
    ) -> Result<Self::Image1D, ProbeError>;

    /// Allocates a 2D image.
    fn create_img_2d(
        &self,
        flags: MemFlags,
        format: ImageFormat,
        width: u32,
        height: u32,
    ) -> Result<Self::Image2D, ProbeError>;

    /// Maps a buffer for host access for the duration of `f`.
    fn map_buf<R>(
        &self,
        buf: &Self::Buffer,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, ProbeError>;

    /// Maps a 1D image for host access for the duration of `f`.
    fn map_img_1d<R>(
        &self,
        img: &Self::Image1D,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, ProbeError>;

    /// Maps a 2D image for host access for the duration of `f`; the second
    /// argument is the row pitch in bytes.
    fn map_img_2d<R>(
        &self,
        img: &Self::Image2D,
        f: impl FnOnce(&mut [u8], usize) -> R,
    ) -> Result<R, ProbeError>;

    /// Runs `kernel` `niter` times and returns the elapsed time in
    /// microseconds.
    fn bench_kernel(
        &self,
        kernel: &Self::Kernel,
        local: NdRange,
        global: NdRange,
        niter: u32,
    ) -> Result<f64, ProbeError>;
}
