//! Per-aspect result tables and their export.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use csv::WriterBuilder;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, ProbeError};
use crate::value::Value;

/// Kind of the values a column accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Integers.
    Int,
    /// Floats; integers are accepted and widened.
    Float,
    /// Strings.
    Text,
    /// Booleans.
    Bool,
}

impl ColumnKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            ColumnKind::Int => matches!(value, Value::Int(_)),
            ColumnKind::Float => value.is_num(),
            ColumnKind::Text => matches!(value, Value::Str(_)),
            ColumnKind::Bool => matches!(value, Value::Bool(_)),
        }
    }
}

/// Column schema entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column header.
    pub name: String,
    /// Accepted value kind.
    pub kind: ColumnKind,
}

impl Column {
    /// Integer column.
    pub fn int(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Int,
        }
    }

    /// Float column.
    pub fn float(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Float,
        }
    }

    /// Text column.
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Text,
        }
    }

    /// Boolean column.
    pub fn bool(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Bool,
        }
    }
}

/// Append-only table of measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Creates an empty table with the given schema.
    pub fn new(columns: impl IntoIterator<Item = Column>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            rows: Vec::new(),
        }
    }

    /// Column schema.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no row has been pushed.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row after checking its arity and kinds against the schema.
    pub fn push_row(&mut self, row: impl IntoIterator<Item = Value>) -> Result<(), ProbeError> {
        let row: Vec<Value> = row.into_iter().collect();
        if row.len() != self.columns.len() {
            return Err(ProbeError::Contract(
                ErrorInfo::new("table_arity", "row does not match the table schema")
                    .with_context("expected", self.columns.len().to_string())
                    .with_context("actual", row.len().to_string()),
            ));
        }
        for (column, value) in self.columns.iter().zip(&row) {
            if !column.kind.accepts(value) {
                return Err(ProbeError::Contract(
                    ErrorInfo::new("table_kind", "value kind does not match the column")
                        .with_context("column", column.name.clone())
                        .with_context("value", value.kind()),
                ));
            }
        }
        self.rows.push(row);
        Ok(())
    }

    /// Row `index` as a mapping from column name to value.
    pub fn row_map(&self, index: usize) -> Option<BTreeMap<&str, &Value>> {
        let row = self.rows.get(index)?;
        Some(
            self.columns
                .iter()
                .map(|column| column.name.as_str())
                .zip(row)
                .collect(),
        )
    }

    /// Writes the table as CSV with a header line.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ProbeError> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(writer);
        writer
            .write_record(self.columns.iter().map(|column| column.name.as_str()))
            .map_err(|err| wrap_csv("table-write-header", err))?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|value| value.to_string()))
                .map_err(|err| wrap_csv("table-write-row", err))?;
        }
        writer
            .flush()
            .map_err(|err| wrap_csv("table-flush", err.into()))?;
        Ok(())
    }
}

/// Export collaborator receiving closed tables at shutdown.
pub trait TableSink {
    /// Exports the table produced by `aspect`.
    fn export(&mut self, aspect: &str, table: &Table) -> Result<(), ProbeError>;
}

/// Sink writing each table to `<dir>/<aspect>.csv`.
#[derive(Debug, Clone)]
pub struct CsvTableSink {
    dir: PathBuf,
}

impl CsvTableSink {
    /// Creates a sink rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path the table of `aspect` is written to.
    pub fn path_for(&self, aspect: &str) -> PathBuf {
        self.dir.join(format!("{aspect}.csv"))
    }
}

impl TableSink for CsvTableSink {
    fn export(&mut self, aspect: &str, table: &Table) -> Result<(), ProbeError> {
        fs::create_dir_all(&self.dir).map_err(|err| {
            ProbeError::Store(
                ErrorInfo::new("table-dir", "failed to create table directory")
                    .with_context("path", self.dir.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        let path = self.path_for(aspect);
        let file = fs::File::create(&path).map_err(|err| {
            ProbeError::Store(
                ErrorInfo::new("table-open", "failed to create table file")
                    .with_context("path", path.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        table.write_csv(file)?;
        log::info!("exported table of aspect '{aspect}' to '{}'", path.display());
        Ok(())
    }
}

fn wrap_csv(code: &str, err: csv::Error) -> ProbeError {
    ProbeError::Store(ErrorInfo::new(code, "CSV table failure").with_hint(err.to_string()))
}
