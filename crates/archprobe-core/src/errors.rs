//! Structured error types shared across ArchProbe crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`ProbeError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (aspect names, fields, paths).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for ArchProbe.
///
/// `Contract` and `Dependency` are programming or pipeline-ordering errors and
/// are never recovered; see [`ProbeError::is_fatal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum ProbeError {
    /// Lifecycle misuse: access outside an aspect scope, overlapping scopes.
    #[error("contract violation: {0}")]
    Contract(ErrorInfo),
    /// A prerequisite aspect has not produced a completed report.
    #[error("dependency error: {0}")]
    Dependency(ErrorInfo),
    /// Persisted document I/O and serialization errors.
    #[error("store error: {0}")]
    Store(ErrorInfo),
    /// Compute backend failures.
    #[error("backend error: {0}")]
    Backend(ErrorInfo),
    /// Measurement could not produce a usable figure.
    #[error("measurement error: {0}")]
    Measurement(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl ProbeError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            ProbeError::Contract(info)
            | ProbeError::Dependency(info)
            | ProbeError::Store(info)
            | ProbeError::Backend(info)
            | ProbeError::Measurement(info) => info,
        }
    }

    /// Returns true when the error must terminate the run.
    ///
    /// Store errors are fatal too: a report that cannot be flushed breaks
    /// resumability.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProbeError::Contract(_) | ProbeError::Dependency(_) | ProbeError::Store(_)
        )
    }

    pub(crate) fn contract(code: &str, message: impl Into<String>) -> Self {
        ProbeError::Contract(ErrorInfo::new(code, message))
    }

    pub(crate) fn store(code: &str, err: impl ToString) -> Self {
        ProbeError::Store(ErrorInfo::new(code, err.to_string()))
    }
}
