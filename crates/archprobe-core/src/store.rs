//! Persistent configuration and report documents, scoped per aspect.

use std::path::{Path, PathBuf};

use crate::errors::ProbeError;
use crate::format::{read_document, write_document};
use crate::value::{Document, FieldValue, NumericField, Value};

/// Field holding the completion marker of an aspect report.
pub const DONE_FIELD: &str = "done";

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "ArchProbe.json";

/// Default report file name.
pub const DEFAULT_REPORT_PATH: &str = "ArchProbeReport.json";

/// Owner of the configuration and report documents.
///
/// Reads through the healing accessors never fail: a missing or malformed
/// aspect record is replaced by an empty document and a warning is logged.
#[derive(Debug, Clone)]
pub struct RecordStore {
    cfg_path: PathBuf,
    report_path: PathBuf,
    cfg: Document,
    report: Document,
    cfg_amended: bool,
}

impl RecordStore {
    /// Loads both documents. Missing or unreadable files start empty.
    pub fn open(cfg_path: impl Into<PathBuf>, report_path: impl Into<PathBuf>) -> Self {
        let cfg_path = cfg_path.into();
        let report_path = report_path.into();
        let cfg = load_or_empty(&cfg_path, "configuration");
        let report = load_or_empty(&report_path, "report");
        Self {
            cfg_path,
            report_path,
            cfg,
            report,
            cfg_amended: false,
        }
    }

    /// Builds a store from in-memory documents bound to the given paths.
    pub fn from_documents(
        cfg_path: impl Into<PathBuf>,
        report_path: impl Into<PathBuf>,
        cfg: Document,
        report: Document,
    ) -> Self {
        Self {
            cfg_path: cfg_path.into(),
            report_path: report_path.into(),
            cfg,
            report,
            cfg_amended: false,
        }
    }

    /// Path the configuration is persisted to.
    pub fn config_path(&self) -> &Path {
        &self.cfg_path
    }

    /// Path the report is persisted to.
    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    /// Whole configuration document.
    pub fn config(&self) -> &Document {
        &self.cfg
    }

    /// Whole report document.
    pub fn report(&self) -> &Document {
        &self.report
    }

    /// True once a default has been written into the configuration.
    pub fn config_amended(&self) -> bool {
        self.cfg_amended
    }

    /// Configuration record of `aspect`, created when absent or malformed.
    pub fn aspect_cfg_mut(&mut self, aspect: &str) -> &mut Document {
        heal(&mut self.cfg, "configuration", aspect)
    }

    /// Report record of `aspect`, created when absent or malformed.
    pub fn aspect_report_mut(&mut self, aspect: &str) -> &mut Document {
        heal(&mut self.report, "report", aspect)
    }

    /// Report record of `aspect` without healing.
    pub fn aspect_report(&self, aspect: &str) -> Option<&Document> {
        self.report.get(aspect).and_then(Value::as_doc)
    }

    /// True when the aspect's report carries `done: true`.
    pub fn is_done(&self, aspect: &str) -> bool {
        self.aspect_report(aspect)
            .and_then(|report| report.get(DONE_FIELD))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Replaces the aspect's report with an empty record.
    pub fn clear_aspect_report(&mut self, aspect: &str) {
        if aspect.is_empty() {
            return;
        }
        self.report
            .insert(aspect.to_string(), Value::Doc(Document::new()));
        log::info!("cleared report of aspect '{aspect}'");
    }

    /// Reads a numeric configuration field, storing `default` when the field
    /// is absent or cannot be converted to `T`.
    pub fn aspect_cfg_num<T: NumericField>(&mut self, aspect: &str, field: &str, default: T) -> T {
        self.aspect_cfg_value(aspect, field, default)
    }

    /// Reads any configuration field with the same healing rule as
    /// [`RecordStore::aspect_cfg_num`].
    pub fn aspect_cfg_value<T>(&mut self, aspect: &str, field: &str, default: T) -> T
    where
        T: FieldValue + Clone + std::fmt::Display,
    {
        let cfg = self.aspect_cfg_mut(aspect);
        if let Some(value) = cfg.get(field).and_then(T::from_value) {
            return value;
        }
        log::warn!(
            "configuration entry '{field}' of aspect '{aspect}' is invalid, \
             defaulting to '{default}'"
        );
        cfg.insert(field.to_string(), default.clone().into_value());
        self.cfg_amended = true;
        default
    }

    /// Overwrites a report field of `aspect`.
    pub fn set_report_value(&mut self, aspect: &str, field: &str, value: Value) {
        log::info!("reported '{field}' = '{value}' for aspect '{aspect}'");
        self.aspect_report_mut(aspect)
            .insert(field.to_string(), value);
    }

    /// Reads a report field of `aspect` without side effects.
    pub fn report_field<T: FieldValue>(&self, aspect: &str, field: &str) -> Option<T> {
        let raw = self.aspect_report(aspect)?.get(field)?;
        let value = T::from_value(raw);
        if value.is_none() {
            log::warn!(
                "report entry '{field}' of aspect '{aspect}' holds an incompatible {}",
                raw.kind()
            );
        }
        value
    }

    /// Rewrites the report file.
    pub fn save_report(&self) -> Result<(), ProbeError> {
        write_document(&self.report_path, &self.report)?;
        log::debug!("report saved to '{}'", self.report_path.display());
        Ok(())
    }

    /// Rewrites the configuration file.
    pub fn save_config(&mut self) -> Result<(), ProbeError> {
        write_document(&self.cfg_path, &self.cfg)?;
        self.cfg_amended = false;
        log::debug!("configuration saved to '{}'", self.cfg_path.display());
        Ok(())
    }
}

fn load_or_empty(path: &Path, scope: &str) -> Document {
    match read_document::<Value>(path) {
        Ok(Some(Value::Doc(doc))) => {
            log::info!("loaded {scope} from '{}'", path.display());
            doc
        }
        Ok(Some(other)) => {
            log::warn!(
                "{scope} '{}' holds a {} instead of a document, starting empty",
                path.display(),
                other.kind()
            );
            Document::new()
        }
        Ok(None) => {
            log::info!("{scope} '{}' does not exist yet, starting empty", path.display());
            Document::new()
        }
        Err(err) => {
            log::warn!("{scope} '{}' is unreadable ({err}), starting empty", path.display());
            Document::new()
        }
    }
}

fn heal<'a>(doc: &'a mut Document, scope: &str, aspect: &str) -> &'a mut Document {
    let slot = doc.entry(aspect.to_string()).or_insert(Value::Null);
    if slot.as_doc().is_none() {
        log::warn!("aspect {scope} ('{aspect}') is invalid, a new record is created");
        *slot = Value::Doc(Document::new());
    }
    match slot {
        Value::Doc(inner) => inner,
        _ => unreachable!("slot was replaced by a document above"),
    }
}
