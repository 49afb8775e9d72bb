//! Aspect lifecycle controller.
//!
//! [`Environment`] owns the record store, the device capability snapshot, the
//! profiled result snapshot and the table of the active aspect. At most one
//! aspect is active at any time; every per-aspect accessor fails with a
//! contract violation outside an active scope.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::{ComputeBackend, ImageFormat, KernelArg, MemFlags, NdRange};
use crate::converge::{self, Convergence, ConvergencePolicy};
use crate::device::{DeviceReport, ProfiledReport};
use crate::errors::{ErrorInfo, ProbeError};
use crate::gate;
use crate::store::{RecordStore, DEFAULT_CONFIG_PATH, DEFAULT_REPORT_PATH, DONE_FIELD};
use crate::table::{Column, Table, TableSink};
use crate::value::{FieldValue, NumericField, Value};

/// Construction options of an [`Environment`].
#[derive(Debug, Clone)]
pub struct EnvOpts {
    /// Configuration document path.
    pub config_path: PathBuf,
    /// Report document path.
    pub report_path: PathBuf,
    /// Policy used by [`Environment::ensure_min_niter`].
    pub convergence: ConvergencePolicy,
}

impl Default for EnvOpts {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            convergence: ConvergencePolicy::default(),
        }
    }
}

/// Lifecycle state of an aspect within the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AspectState {
    /// Not started in this run.
    NotStarted,
    /// Scope is open.
    Started,
    /// Closed with `done: true`.
    ReadyDone,
    /// Closed with `done: false`.
    ReadyIncomplete,
}

/// Orchestrator state for one run against one device.
pub struct Environment<B: ComputeBackend> {
    backend: B,
    store: RecordStore,
    states: BTreeMap<String, AspectState>,
    cur_aspect: Option<String>,
    cur_table: Option<Table>,
    closed_tables: Vec<(String, Table)>,
    policy: ConvergencePolicy,
    last_convergence: Option<Convergence>,
    dev_report: DeviceReport,
    my_report: ProfiledReport,
}

impl<B: ComputeBackend> Environment<B> {
    /// Loads the persisted documents and captures the device snapshot.
    pub fn new(backend: B, opts: EnvOpts) -> Result<Self, ProbeError> {
        let store = RecordStore::open(opts.config_path, opts.report_path);
        Self::with_store(backend, store, opts.convergence)
    }

    /// Builds an environment around an already loaded store.
    pub fn with_store(
        backend: B,
        store: RecordStore,
        policy: ConvergencePolicy,
    ) -> Result<Self, ProbeError> {
        let dev_report = backend.device_report()?;
        log::info!(
            "device '{}': {} compute units, {} logical threads",
            dev_report.name,
            dev_report.nsm,
            dev_report.nthread_logic
        );
        Ok(Self {
            backend,
            store,
            states: BTreeMap::new(),
            cur_aspect: None,
            cur_table: None,
            closed_tables: Vec::new(),
            policy,
            last_convergence: None,
            dev_report,
            my_report: ProfiledReport::default(),
        })
    }

    /// Compute backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Record store, read-only.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Capability snapshot taken at construction.
    pub fn dev_report(&self) -> &DeviceReport {
        &self.dev_report
    }

    /// Figures measured so far.
    pub fn my_report(&self) -> &ProfiledReport {
        &self.my_report
    }

    /// Figures measured so far, for the aspect that owns them.
    pub fn my_report_mut(&mut self) -> &mut ProfiledReport {
        &mut self.my_report
    }

    /// Name of the active aspect.
    pub fn cur_aspect(&self) -> Option<&str> {
        self.cur_aspect.as_deref()
    }

    /// State of `aspect` in this run.
    pub fn aspect_state(&self, aspect: &str) -> AspectState {
        self.states
            .get(aspect)
            .copied()
            .unwrap_or(AspectState::NotStarted)
    }

    /// Outcome of the last [`Environment::ensure_min_niter`] call.
    pub fn last_convergence(&self) -> Option<&Convergence> {
        self.last_convergence.as_ref()
    }

    /// Opens the scope of `aspect`, discarding its previous report.
    pub fn report_started(&mut self, aspect: &str) -> Result<(), ProbeError> {
        if aspect.is_empty() {
            return Err(ProbeError::contract("empty_aspect", "aspect name cannot be empty"));
        }
        if let Some(active) = &self.cur_aspect {
            return Err(ProbeError::Contract(
                ErrorInfo::new("aspect_active", "an aspect has not been reported ready yet")
                    .with_context("active", active.clone())
                    .with_context("requested", aspect),
            ));
        }
        if self.states.contains_key(aspect) {
            log::info!("aspect '{aspect}' is restarted in this run");
        }
        self.store.clear_aspect_report(aspect);
        self.cur_aspect = Some(aspect.to_string());
        self.states.insert(aspect.to_string(), AspectState::Started);
        self.cur_table = Some(Table::new(Vec::new()));
        log::info!("started aspect '{aspect}'");
        Ok(())
    }

    /// Returns true when `aspect` already has a completed report from an
    /// earlier run, in which case no scope is opened. Otherwise opens the
    /// scope like [`Environment::report_started`] and returns false.
    pub fn report_started_lazy(&mut self, aspect: &str) -> Result<bool, ProbeError> {
        if self.cur_aspect.is_none()
            && !aspect.is_empty()
            && !self.states.contains_key(aspect)
            && self.store.is_done(aspect)
        {
            log::info!("aspect '{aspect}' is already done; skipped");
            return Ok(true);
        }
        self.report_started(aspect)?;
        Ok(false)
    }

    /// Closes the active scope, marks it `done` and flushes the report.
    pub fn report_ready(&mut self, done: bool) -> Result<(), ProbeError> {
        let Some(aspect) = self.cur_aspect.take() else {
            return Err(ProbeError::contract(
                "no_active_aspect",
                "report_ready called without an active aspect",
            ));
        };
        self.store
            .set_report_value(&aspect, DONE_FIELD, Value::Bool(done));
        let state = if done {
            AspectState::ReadyDone
        } else {
            AspectState::ReadyIncomplete
        };
        self.states.insert(aspect.clone(), state);
        if let Some(table) = self.cur_table.take() {
            if !table.columns().is_empty() {
                self.closed_tables.retain(|(name, _)| name != &aspect);
                self.closed_tables.push((aspect.clone(), table));
            }
        }
        self.store.save_report()?;
        log::info!("aspect '{aspect}' is ready (done={done})");
        Ok(())
    }

    /// Fails unless `aspect` has a completed report.
    pub fn check_dep(&self, aspect: &str) -> Result<(), ProbeError> {
        gate::check_dep(&self.store, aspect)
    }

    /// Replaces the table of the active aspect with an empty one using the
    /// given schema.
    pub fn init_table(&mut self, columns: impl IntoIterator<Item = Column>) -> Result<(), ProbeError> {
        let aspect = self.active("table can only be initialized in scope of a report")?;
        log::info!("initialized table for aspect '{aspect}'");
        self.cur_table = Some(Table::new(columns));
        Ok(())
    }

    /// Table of the active aspect.
    pub fn table(&mut self) -> Result<&mut Table, ProbeError> {
        self.active("table can only be accessed in scope of a report")?;
        self.cur_table
            .as_mut()
            .ok_or_else(|| ProbeError::contract("no_table", "no table allocated for the active aspect"))
    }

    /// Numeric configuration field of the active aspect, healed to `default`.
    pub fn cfg_num<T: NumericField>(&mut self, field: &str, default: T) -> Result<T, ProbeError> {
        let aspect = self.active("configuration is only readable in scope of a report")?;
        Ok(self.store.aspect_cfg_num(&aspect, field, default))
    }

    /// Any configuration field of the active aspect, healed to `default`.
    pub fn cfg_value<T>(&mut self, field: &str, default: T) -> Result<T, ProbeError>
    where
        T: FieldValue + Clone + std::fmt::Display,
    {
        let aspect = self.active("configuration is only readable in scope of a report")?;
        Ok(self.store.aspect_cfg_value(&aspect, field, default))
    }

    /// Numeric configuration field of a named aspect, healed to `default`.
    pub fn aspect_cfg_num<T: NumericField>(&mut self, aspect: &str, field: &str, default: T) -> T {
        self.store.aspect_cfg_num(aspect, field, default)
    }

    /// Writes a field into the active aspect's report.
    pub fn report_value<T: FieldValue>(&mut self, field: &str, value: T) -> Result<(), ProbeError> {
        let aspect = self.active("report can only be written in scope of a report")?;
        self.store
            .set_report_value(&aspect, field, value.into_value());
        Ok(())
    }

    /// Reads a field of the active aspect's report.
    pub fn try_get_report<T: FieldValue>(&self, field: &str) -> Result<Option<T>, ProbeError> {
        let aspect = self.active("report can only be read in scope of a report")?;
        Ok(self.try_get_aspect_report(&aspect, field))
    }

    /// Reads a field of any aspect's report without side effects.
    pub fn try_get_aspect_report<T: FieldValue>(&self, aspect: &str, field: &str) -> Option<T> {
        let value = self.store.report_field(aspect, field)?;
        if let Some(raw) = self.store.aspect_report(aspect).and_then(|doc| doc.get(field)) {
            log::info!("already know that '{field}' from aspect '{aspect}' is {raw}");
        }
        Some(value)
    }

    /// Reads a field of the active aspect's report; absence is fatal.
    pub fn must_get_report<T: FieldValue>(&self, field: &str) -> Result<T, ProbeError> {
        let aspect = self.active("report can only be read in scope of a report")?;
        self.must_get_aspect_report(&aspect, field)
    }

    /// Reads a field of any aspect's report; absence is fatal.
    pub fn must_get_aspect_report<T: FieldValue>(
        &self,
        aspect: &str,
        field: &str,
    ) -> Result<T, ProbeError> {
        self.try_get_aspect_report(aspect, field).ok_or_else(|| {
            ProbeError::Contract(
                ErrorInfo::new("report_missing", "cannot get report field")
                    .with_context("aspect", aspect)
                    .with_context("field", field),
            )
        })
    }

    /// Discards the report of `aspect`.
    pub fn clear_aspect_report(&mut self, aspect: &str) {
        self.store.clear_aspect_report(aspect);
    }

    /// Grows `niter` until `run` is long and stable enough, recording the
    /// final relative standard deviation as `timing_std`.
    ///
    /// `run(backend, niter)` executes the workload `niter` times and returns
    /// the elapsed microseconds.
    pub fn ensure_min_niter<F>(
        &mut self,
        min_time_us: f64,
        niter: u32,
        mut run: F,
    ) -> Result<u32, ProbeError>
    where
        F: FnMut(&B, u32) -> Result<f64, ProbeError>,
    {
        let backend = &self.backend;
        let outcome =
            converge::ensure_min_niter(&self.policy, min_time_us, niter, |n| run(backend, n))?;
        self.my_report.timing_std = outcome.rsd;
        self.last_convergence = Some(outcome);
        Ok(outcome.niter)
    }

    /// Compiles a program from source.
    pub fn create_program(&self, src: &str, build_opts: &str) -> Result<B::Program, ProbeError> {
        self.backend.create_program(src, build_opts)
    }

    /// Loads a program from a device binary.
    pub fn create_program_binary(
        &self,
        binary: &[u8],
        build_opts: &str,
    ) -> Result<B::Program, ProbeError> {
        self.backend.create_program_binary(binary, build_opts)
    }

    /// Looks a kernel up in a program.
    pub fn create_kernel(&self, program: &B::Program, name: &str) -> Result<B::Kernel, ProbeError> {
        self.backend.create_kernel(program, name)
    }

    /// Binds a kernel argument.
    pub fn set_arg(
        &self,
        kernel: &mut B::Kernel,
        index: u32,
        arg: KernelArg<'_, B>,
    ) -> Result<(), ProbeError> {
        self.backend.set_arg(kernel, index, arg)
    }

    /// Allocates a buffer.
    pub fn create_buf(&self, flags: MemFlags, size: usize) -> Result<B::Buffer, ProbeError> {
        self.backend.create_buf(flags, size)
    }

    /// Allocates a 1D image.
    pub fn create_img_1d(
        &self,
        flags: MemFlags,
        format: ImageFormat,
        width: u32,
    ) -> Result<B::Image1D, ProbeError> {
        self.backend.create_img_1d(flags, format, width)
    }

    /// Allocates a 2D image.
    pub fn create_img_2d(
        &self,
        flags: MemFlags,
        format: ImageFormat,
        width: u32,
        height: u32,
    ) -> Result<B::Image2D, ProbeError> {
        self.backend.create_img_2d(flags, format, width, height)
    }

    /// Maps a buffer for the duration of `f`.
    pub fn map_buf<R>(
        &self,
        buf: &B::Buffer,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, ProbeError> {
        self.backend.map_buf(buf, f)
    }

    /// Maps a 1D image for the duration of `f`.
    pub fn map_img_1d<R>(
        &self,
        img: &B::Image1D,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, ProbeError> {
        self.backend.map_img_1d(img, f)
    }

    /// Maps a 2D image for the duration of `f`.
    pub fn map_img_2d<R>(
        &self,
        img: &B::Image2D,
        f: impl FnOnce(&mut [u8], usize) -> R,
    ) -> Result<R, ProbeError> {
        self.backend.map_img_2d(img, f)
    }

    /// Runs a kernel `niter` times; returns microseconds.
    pub fn bench_kernel(
        &self,
        kernel: &B::Kernel,
        local: NdRange,
        global: NdRange,
        niter: u32,
    ) -> Result<f64, ProbeError> {
        self.backend.bench_kernel(kernel, local, global, niter)
    }

    /// Ends the run: flushes the report, persists an amended configuration
    /// and exports every closed table through `sink`.
    pub fn finish(mut self, sink: &mut dyn TableSink) -> Result<ProfiledReport, ProbeError> {
        if let Some(active) = &self.cur_aspect {
            return Err(ProbeError::Contract(
                ErrorInfo::new("aspect_active", "run finished with an open aspect scope")
                    .with_context("active", active.clone()),
            ));
        }
        self.store.save_report()?;
        if self.store.config_amended() {
            self.store.save_config()?;
        }
        for (aspect, table) in &self.closed_tables {
            sink.export(aspect, table)?;
        }
        log::info!("run finished; {} aspect(s) touched", self.states.len());
        Ok(self.my_report)
    }

    fn active(&self, message: &str) -> Result<String, ProbeError> {
        self.cur_aspect
            .clone()
            .ok_or_else(|| ProbeError::contract("no_active_aspect", message))
    }
}
