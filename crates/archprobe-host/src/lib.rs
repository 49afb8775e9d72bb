#![deny(missing_docs)]
#![doc = "Host CPU backend for ArchProbe together with the aspects that characterize it."]

/// Characterization procedures run against the host backend.
pub mod aspects;
/// `ComputeBackend` implementation over host memory.
pub mod backend;
/// Built-in kernel library.
pub mod kernels;

pub use aspects::{default_aspects, BufferBandwidth, BufferCacheHierarchy, Gflops, Timing};
pub use backend::{HostArg, HostBackend, HostBuffer, HostImage, HostKernel, HostProgram};
pub use kernels::KernelKind;
