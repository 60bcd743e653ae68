// SPDX-License-Identifier: Apache-2.0

//! JSON store plumbing shared by the persistent stores.
//!
//! Saves go through a temp file in the target directory followed by an
//! atomic rename, so a reader never observes a partially written store. A
//! store file that exists but cannot be parsed is a hard error; silently
//! reinitializing would discard accumulated learning.

use std::fmt;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Persistent-store failure.
#[derive(Debug)]
pub enum StoreError {
    Io {
        path: PathBuf,
        source: io::Error,
    },
    /// The store file exists but does not parse. Fail closed: the caller
    /// must not continue with reinitialized state.
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { path, source } => {
                write!(f, "store i/o failure at '{}': {}", path.display(), source)
            }
            StoreError::Corrupt { path, source } => write!(
                f,
                "store '{}' exists but cannot be parsed ({}); refusing to discard it",
                path.display(),
                source
            ),
            StoreError::Encode { path, source } => {
                write!(f, "failed to encode store '{}': {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Corrupt { source, .. } | StoreError::Encode { source, .. } => Some(source),
        }
    }
}

/// Loads a JSON store. `Ok(None)` when the file does not exist yet;
/// `Err(Corrupt)` when it exists but does not parse.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Serializes `value` to a temp file next to `path` and atomically renames
/// it over `path`.
pub fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |e: io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    let text = serde_json::to_string_pretty(value).map_err(|e| StoreError::Encode {
        path: path.to_path_buf(),
        source: e,
    })?;
    tmp.write_all(text.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
