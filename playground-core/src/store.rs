//! Persistent storage of the last edited source text.
//!
//! A single string lives under a fixed key. When nothing has been stored yet
//! (or the stored value is empty) readers get [`DEFAULT_CODE`].

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key the source text is stored under
pub const CODE_STORAGE_KEY: &str = "savedCode";

/// Source shown when nothing has been persisted yet
pub const DEFAULT_CODE: &str = r#"print("Hello World!");
var a = 2;

fun sum(a,b) {
  return a + b;
}

print(sum(a, 5));"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access code store {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize code store: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Key-value store for the last edited source
pub trait CodeStore: Send + Sync {
    /// The stored source, or [`DEFAULT_CODE`] when nothing usable is stored
    fn get(&self) -> String;

    fn set(&self, code: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCode {
    #[serde(rename = "savedCode", default)]
    saved_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<String>,
}

/// JSON file backed store, the on-disk stand-in for browser local storage
#[derive(Debug)]
pub struct FileCodeStore {
    path: PathBuf,
}

impl FileCodeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Option<StoredCode> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), "Failed to read code store: {}", err);
                return None;
            }
        };

        match serde_json::from_slice::<StoredCode>(&data) {
            Ok(stored) => Some(stored),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), "Failed to parse code store: {}", err);
                None
            }
        }
    }
}

impl CodeStore for FileCodeStore {
    fn get(&self) -> String {
        self.read()
            .and_then(|stored| stored.saved_code)
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| DEFAULT_CODE.to_string())
    }

    fn set(&self, code: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let payload = StoredCode {
            saved_code: Some(code.to_string()),
            saved_at: Some(Utc::now().to_rfc3339()),
        };
        let json = serde_json::to_vec_pretty(&payload)?;
        fs::write(&self.path, json).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), bytes = code.len(), "saved code");
        Ok(())
    }
}

/// In-memory store, used when persistence is disabled and in tests
#[derive(Debug, Default)]
pub struct MemoryCodeStore {
    code: Mutex<Option<String>>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodeStore for MemoryCodeStore {
    fn get(&self) -> String {
        self.code
            .lock()
            .clone()
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| DEFAULT_CODE.to_string())
    }

    fn set(&self, code: &str) -> Result<(), StoreError> {
        *self.code.lock() = Some(code.to_string());
        Ok(())
    }
}
