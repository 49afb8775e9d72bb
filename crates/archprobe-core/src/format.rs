use std::fs;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::errors::{ErrorInfo, ProbeError};

/// On-disk encoding of a persisted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Pretty printed JSON (the default).
    Json,
    /// YAML, selected by a `.yaml` or `.yml` extension.
    Yaml,
}

impl DocumentFormat {
    /// Picks the format from the file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }

    /// Serializes a value. Documents are `BTreeMap`s so key order is stable.
    pub fn to_bytes<T: Serialize>(self, value: &T) -> Result<Vec<u8>, ProbeError> {
        match self {
            DocumentFormat::Json => {
                let mut bytes = serde_json::to_vec_pretty(value)
                    .map_err(|err| ProbeError::store("json_serialize", err))?;
                bytes.push(b'\n');
                Ok(bytes)
            }
            DocumentFormat::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|err| ProbeError::store("yaml_serialize", err)),
        }
    }

    /// Deserializes a value.
    pub fn from_slice<T: DeserializeOwned>(self, data: &[u8]) -> Result<T, ProbeError> {
        match self {
            DocumentFormat::Json => serde_json::from_slice(data)
                .map_err(|err| ProbeError::store("json_deserialize", err)),
            DocumentFormat::Yaml => serde_yaml::from_slice(data)
                .map_err(|err| ProbeError::store("yaml_deserialize", err)),
        }
    }
}

/// Writes `value` to `path` through a sibling temp file and a rename, so a
/// crash never leaves a truncated document behind.
pub fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<(), ProbeError> {
    let bytes = DocumentFormat::from_path(path).to_bytes(value)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| io_error("document_dir", path, err))?;
        }
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);
    fs::write(tmp, bytes).map_err(|err| io_error("document_write", tmp, err))?;
    fs::rename(tmp, path).map_err(|err| io_error("document_rename", path, err))
}

/// Reads a document, returning `Ok(None)` when the file does not exist.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ProbeError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).map_err(|err| io_error("document_read", path, err))?;
    DocumentFormat::from_path(path).from_slice(&bytes).map(Some)
}

fn io_error(code: &str, path: &Path, err: std::io::Error) -> ProbeError {
    ProbeError::Store(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}
