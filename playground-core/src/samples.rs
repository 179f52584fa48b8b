//! Sample programs offered by the sample selector.

use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

/// File extension of sample programs
pub const SAMPLE_EXTENSION: &str = "lox";

/// Selector entry that restores the stored source
pub const CHOOSE_ENTRY: &str = "choose";

/// Selector entry that loads the built-in default source
pub const DEFAULT_ENTRY: &str = "default";

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("Failed to read samples from {path}: {message}")]
    Read { path: String, message: String },

    #[error("Unknown sample: {0}")]
    Unknown(String),
}

/// What the sample selector asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleChoice {
    /// Go back to the persisted source
    Stored,
    /// The built-in default program
    Default,
    /// A named sample file
    Named(String),
}

impl SampleChoice {
    pub fn parse(value: &str) -> Self {
        match value {
            CHOOSE_ENTRY => Self::Stored,
            DEFAULT_ENTRY => Self::Default,
            name => Self::Named(name.to_string()),
        }
    }
}

/// Name → source mapping of sample programs, ordered by file name
#[derive(Debug, Clone, Default)]
pub struct SampleLibrary {
    samples: BTreeMap<String, String>,
}

impl SampleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(samples: BTreeMap<String, String>) -> Self {
        Self { samples }
    }

    /// Load every `*.lox` file directly inside `dir`
    pub fn load_dir(dir: &Path) -> Result<Self, SampleError> {
        let mut samples = BTreeMap::new();

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| SampleError::Read {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(SAMPLE_EXTENSION)
            {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let source = std::fs::read_to_string(path).map_err(|e| SampleError::Read {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            samples.insert(file_name.to_string(), source);
        }

        tracing::debug!(dir = %dir.display(), count = samples.len(), "loaded samples");
        Ok(Self { samples })
    }

    /// Source of a sample, accepting the file name with or without extension
    pub fn get(&self, name: &str) -> Option<&str> {
        self.samples
            .get(name)
            .or_else(|| self.samples.get(&format!("{name}.{SAMPLE_EXTENSION}")))
            .map(String::as_str)
    }

    /// File names in selector order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }

    /// Display label for a sample file name
    pub fn display_name(name: &str) -> &str {
        name.strip_suffix(".lox").unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
