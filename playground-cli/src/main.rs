//! # playground CLI
//!
//! Terminal front end for the Lox playground: run programs through an
//! external interpreter and inspect their output and error locations.

mod commands;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use playground_core::config::{BridgeKind, Config, WireProtocol};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "playground")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, env = "PLAYGROUND_CONFIG", default_value = "playground.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Interpreter executable (overrides bridge.program)
    #[arg(long, env = "PLAYGROUND_INTERPRETER")]
    interpreter: Option<String>,

    /// Worker wire protocol (overrides bridge.protocol)
    #[arg(long, env = "PLAYGROUND_PROTOCOL", value_enum)]
    protocol: Option<ProtocolArg>,

    /// Run a WebAssembly interpreter module instead of a worker process
    #[arg(long, env = "PLAYGROUND_MODULE")]
    module: Option<PathBuf>,

    /// Where the last edited source is kept (overrides storage.path)
    #[arg(long, env = "PLAYGROUND_STORAGE")]
    storage: Option<PathBuf>,

    /// Directory of *.lox samples (overrides samples.dir)
    #[arg(long, env = "PLAYGROUND_SAMPLES")]
    samples: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Json,
    Stdio,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program once and print its output
    Run {
        /// Source file (defaults to the stored source)
        file: Option<PathBuf>,

        /// Do not store the source
        #[arg(long)]
        no_save: bool,
    },

    /// Interactive playground
    Shell {
        /// Edit this file: changes on disk count as edits
        #[arg(long)]
        file: Option<PathBuf>,

        /// Start with auto-run enabled
        #[arg(long)]
        auto_run: bool,
    },

    /// List the available samples
    Samples,
}

impl Cli {
    /// Layer command-line overrides over the file configuration
    fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(program) = &self.interpreter {
            config.bridge.program = program.clone();
        }
        if let Some(protocol) = self.protocol {
            config.bridge.protocol = match protocol {
                ProtocolArg::Json => WireProtocol::Json,
                ProtocolArg::Stdio => WireProtocol::Stdio,
            };
        }
        if let Some(module) = &self.module {
            config.bridge.kind = BridgeKind::Wasm;
            config.bridge.module = Some(absolute(module)?);
        }
        if let Some(storage) = &self.storage {
            config.storage.path = absolute(storage)?;
        }
        if let Some(samples) = &self.samples {
            config.samples.dir = Some(absolute(samples)?);
        }
        Ok(())
    }
}

/// Command-line paths are relative to the working directory, not the config
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    Ok(cwd.join(path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout belongs to program output
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::WARN.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = Config::load_or_default(&cli.config).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config)?;
    config.validate().context("Invalid configuration")?;

    match &cli.command {
        Commands::Run { file, no_save } => commands::run_once(&config, file.as_deref(), *no_save).await,
        Commands::Shell { file, auto_run } => {
            commands::interactive_shell(&config, file.as_deref(), *auto_run).await
        }
        Commands::Samples => commands::list_samples(&config),
    }
}
