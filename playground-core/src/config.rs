//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct matching playground.yml schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub samples: SamplesConfig,

    /// Re-run automatically after edits settle
    #[serde(default)]
    pub auto_run: bool,

    /// Persist the source on every user edit instead of only on run dispatch
    #[serde(default)]
    pub persist_on_edit: bool,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_throttle_ms() -> u64 {
    1000
}

fn default_stop_grace_ms() -> u64 {
    2000
}

/// Which interpreter bridge to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeKind {
    #[default]
    Worker,
    Wasm,
}

/// How the worker bridge talks to its process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireProtocol {
    /// Long-lived process speaking newline-delimited JSON events
    Json,
    /// One process per run; stdout is output, stderr is diagnostics
    #[default]
    Stdio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub kind: BridgeKind,

    /// Interpreter executable for the worker bridge
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    #[serde(default)]
    pub protocol: WireProtocol,

    /// Compiled interpreter module for the wasm bridge
    #[serde(default)]
    pub module: Option<PathBuf>,

    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
}

fn default_program() -> String {
    String::from("golox")
}

fn default_args() -> Vec<String> {
    vec!["run".to_string()]
}

fn default_max_memory_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            kind: BridgeKind::default(),
            program: default_program(),
            args: default_args(),
            protocol: WireProtocol::default(),
            module: None,
            max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".playground/storage.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplesConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            storage: StorageConfig::default(),
            samples: SamplesConfig::default(),
            auto_run: false,
            persist_on_edit: false,
            debounce_ms: default_debounce_ms(),
            throttle_ms: default_throttle_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            config_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;

        // Store config file path for relative path resolution
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Load configuration if the file exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Check cross-field requirements. Call once every override has been
    /// applied; a file may leave `bridge.module` to the command line.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.kind == BridgeKind::Wasm && self.bridge.module.is_none() {
            return Err(ConfigError::Invalid(
                "bridge.module is required when bridge.kind is wasm".to_string(),
            ));
        }
        if self.bridge.kind == BridgeKind::Worker && self.bridge.program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "bridge.program must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the persisted source store, resolved relative to config file
    pub fn storage_path(&self) -> PathBuf {
        self.resolve_path(&self.storage.path)
    }

    /// Sample directory, resolved relative to config file
    pub fn samples_dir(&self) -> Option<PathBuf> {
        self.samples.dir.as_ref().map(|dir| self.resolve_path(dir))
    }

    /// Interpreter module path, resolved relative to config file
    pub fn module_path(&self) -> Option<PathBuf> {
        self.bridge.module.as_ref().map(|m| self.resolve_path(m))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Resolve a path relative to the config file location
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(config_path) = &self.config_path {
            let base = config_path.parent().unwrap_or_else(|| Path::new("."));
            base.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.bridge.kind, BridgeKind::Worker);
        assert!(!config.auto_run);
        assert_eq!(config.debounce_ms, 1000);
        assert_eq!(config.throttle_ms, 1000);
        assert_eq!(config.stop_grace(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_worker_config() {
        let yaml = r#"
bridge:
  kind: worker
  program: lox-worker
  args: ["--json"]
  protocol: json
auto_run: true
debounce_ms: 250
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.bridge.program, "lox-worker");
        assert_eq!(config.bridge.args, vec!["--json"]);
        assert_eq!(config.bridge.protocol, WireProtocol::Json);
        assert!(config.auto_run);
        assert_eq!(config.debounce(), Duration::from_millis(250));
    }

    #[test]
    fn test_wasm_requires_module() {
        let mut config = Config::from_yaml("bridge:\n  kind: wasm\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        // Supplied later, e.g. by a command-line override
        config.bridge.module = Some(PathBuf::from("golox.wasm"));
        assert!(config.validate().is_ok());

        config.bridge.kind = BridgeKind::Worker;
        config.bridge.program = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_paths_resolve_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playground.yml");
        std::fs::write(
            &path,
            "storage:\n  path: state/code.json\nsamples:\n  dir: samples\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage_path(), dir.path().join("state/code.json"));
        assert_eq!(config.samples_dir(), Some(dir.path().join("samples")));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("nope.yml")).unwrap();
        assert_eq!(config.bridge.protocol, WireProtocol::Stdio);
    }
}
