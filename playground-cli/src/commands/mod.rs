//! CLI command implementations.

pub mod run;
pub mod samples;
pub mod shell;

pub use run::run_once;
pub use samples::list_samples;
pub use shell::interactive_shell;

use anyhow::{Context, Result};
use playground_core::config::Config;
use playground_core::orchestrator::{OrchestratorSettings, RunOrchestrator};
use playground_core::samples::SampleLibrary;
use playground_core::store::FileCodeStore;
use std::sync::Arc;

/// Sample library named by the configuration, empty when none is configured
pub fn load_samples(config: &Config) -> Result<SampleLibrary> {
    match config.samples_dir() {
        Some(dir) => SampleLibrary::load_dir(&dir)
            .with_context(|| format!("Failed to load samples from {:?}", dir)),
        None => Ok(SampleLibrary::new()),
    }
}

/// Wire the configured bridge, store and samples into an orchestrator
pub fn open_playground(config: &Config) -> Result<RunOrchestrator> {
    let bridge = playground_runtime::build_bridge(config)
        .context("Failed to configure interpreter bridge")?;
    let store = Arc::new(FileCodeStore::new(config.storage_path()));
    // The selector is optional; without samples it offers only the
    // built-in entries
    let samples = load_samples(config).unwrap_or_else(|err| {
        tracing::warn!("{:#}", err);
        SampleLibrary::new()
    });

    Ok(RunOrchestrator::new(bridge, store, OrchestratorSettings::from(config)).with_samples(samples))
}
