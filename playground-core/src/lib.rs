//! Core of the Lox playground
//!
//! Everything between the editor and the interpreter: configuration, the
//! persistent code store, the output log and its error-location extractor,
//! the editor adapter with its decorations, rate limiters, the sample
//! library, the interpreter bridge contract and the run orchestrator that
//! drives them.

pub mod bridge;
pub mod config;
pub mod editor;
pub mod highlight;
pub mod locations;
pub mod observe;
pub mod orchestrator;
pub mod output;
pub mod ratelimit;
pub mod samples;
pub mod store;

pub use bridge::{normalize_event, BridgeError, EventStream, InterpreterBridge, FORCE_STOP_MESSAGE};
pub use config::{BridgeConfig, BridgeKind, Config, ConfigError, WireProtocol};
pub use editor::{ChangeOrigin, Decoration, DecorationKind, DocumentChange, EditorAdapter, Span};
pub use locations::{extract_error_locations, normalize_diagnostic, parse_error_location};
pub use orchestrator::{
    DispatchError, DispatchOptions, OrchestratorSettings, RunError, RunHandle, RunOrchestrator,
    RunOutcome, Trigger,
};
pub use output::OutputLog;
pub use samples::{SampleChoice, SampleError, SampleLibrary};
pub use store::{CodeStore, FileCodeStore, MemoryCodeStore, StoreError, DEFAULT_CODE};

pub use playground_types::{BridgeEvent, ErrorLocation, OutputRecord, RunState};
