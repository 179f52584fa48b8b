//! Interpreter bridges backed by a child process.
//!
//! Two wire protocols are supported: [`JsonWorkerBridge`] keeps one
//! interpreter process alive and exchanges JSON events with it, while
//! [`StdioWorkerBridge`] starts a fresh process per run and treats its
//! standard streams as program output.

mod json;
mod stdio;

pub use json::JsonWorkerBridge;
pub use stdio::StdioWorkerBridge;

use std::process::Stdio;
use tokio::process::Command;

/// How to start the interpreter process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Command with all three standard streams piped
    fn piped(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl std::fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
