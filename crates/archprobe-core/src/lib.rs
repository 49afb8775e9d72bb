#![deny(missing_docs)]
#![doc = "Orchestration core of ArchProbe: aspect lifecycle, record store, dependency gate and convergence driver."]

/// Compute backend contract.
pub mod backend;
/// Adaptive iteration-count driver.
pub mod converge;
/// Device capability and profiled result snapshots.
pub mod device;
/// Aspect lifecycle controller.
pub mod env;
/// Structured error types.
pub mod errors;
/// Document encodings and atomic file helpers.
pub mod format;
/// Dependency gate.
pub mod gate;
/// Fixed-order aspect pipeline.
pub mod pipeline;
/// Configuration and report documents.
pub mod store;
/// Result tables and export sinks.
pub mod table;
/// Typed document values.
pub mod value;

pub use backend::{
    ChannelOrder, ChannelType, ComputeBackend, ImageFormat, KernelArg, MemAccess, MemFlags,
    NdRange,
};
pub use converge::{ensure_min_niter, Convergence, ConvergencePolicy};
pub use device::{pretty_data_size, DeviceReport, ProfiledReport};
pub use env::{AspectState, EnvOpts, Environment};
pub use errors::{ErrorInfo, ProbeError};
pub use format::DocumentFormat;
pub use pipeline::{run_pipeline, Aspect, AspectOutcome, PipelineSummary, RunOpts};
pub use store::{RecordStore, DEFAULT_CONFIG_PATH, DEFAULT_REPORT_PATH, DONE_FIELD};
pub use table::{Column, ColumnKind, CsvTableSink, Table, TableSink};
pub use value::{Document, FieldValue, NumericField, Value};
