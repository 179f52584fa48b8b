//! Shared types for the Lox playground
//!
//! This crate provides the data model used across the playground crates:
//! output records, error locations, run state, and the interpreter event
//! protocol spoken over the bridge boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One line of interpreter output as shown in the output pane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub text: String,
    pub is_error: bool,
}

impl OutputRecord {
    pub fn log(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// A source location derived from a diagnostic (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl ErrorLocation {
    pub fn new(line: u32, column: Option<u32>) -> Self {
        Self { line, column }
    }

    pub fn line(line: u32) -> Self {
        Self { line, column: None }
    }
}

/// Whether a run is currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
}

impl RunState {
    pub fn is_running(self) -> bool {
        matches!(self, RunState::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Running => f.write_str("running"),
        }
    }
}

/// An event emitted by the interpreter during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// One line of program output
    Log(String),
    /// One diagnostic line, `[line L(:C)?] <message>`
    Error(String),
    /// The program asks for a line of input; the run is suspended until it
    /// is supplied
    Input(String),
    /// Unrecoverable failure of the bridge itself; terminates the stream
    Fatal(String),
    /// Normal completion; terminates the stream
    Done,
}

impl BridgeEvent {
    /// Terminal events end the event stream of a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeEvent::Fatal(_) | BridgeEvent::Done)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BridgeEvent::Log(_) => "log",
            BridgeEvent::Error(_) => "error",
            BridgeEvent::Input(_) => "input",
            BridgeEvent::Fatal(_) => "fatal",
            BridgeEvent::Done => "done",
        }
    }
}

/// Wire shape of an interpreter event: `{"type": "...", "data": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: String,
}

/// Returned when a wire event carries a type this side does not understand
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type from interpreter: {0}")]
pub struct UnknownEventType(pub String);

impl TryFrom<WireEvent> for BridgeEvent {
    type Error = UnknownEventType;

    fn try_from(event: WireEvent) -> Result<Self, UnknownEventType> {
        match event.kind.as_str() {
            "log" => Ok(BridgeEvent::Log(event.data)),
            "error" => Ok(BridgeEvent::Error(event.data)),
            "input" => Ok(BridgeEvent::Input(event.data)),
            "fatal" => Ok(BridgeEvent::Fatal(event.data)),
            "done" => Ok(BridgeEvent::Done),
            _ => Err(UnknownEventType(event.kind)),
        }
    }
}

impl From<BridgeEvent> for WireEvent {
    fn from(event: BridgeEvent) -> Self {
        let kind = event.kind().to_string();
        let data = match event {
            BridgeEvent::Log(s)
            | BridgeEvent::Error(s)
            | BridgeEvent::Input(s)
            | BridgeEvent::Fatal(s) => s,
            BridgeEvent::Done => String::new(),
        };
        Self { kind, data }
    }
}

/// A command sent to the interpreter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeCommand {
    Run { code: String },
    Stop,
    InputResult { data: String },
}
