//! Interpreter bridges for the Lox playground
//!
//! Implementations of [`InterpreterBridge`] that reach an external Lox
//! interpreter: a child process (JSON event protocol or plain stdio) or a
//! WebAssembly module executed with wasmtime.

pub mod protocol;
pub mod wasm;
pub mod worker;

pub use protocol::{decode_event, encode_command, ProtocolError};
pub use wasm::{ModuleSource, WasmBridge};
pub use worker::{JsonWorkerBridge, StdioWorkerBridge, WorkerCommand};

use playground_core::bridge::{BridgeError, InterpreterBridge};
use playground_core::config::{BridgeKind, Config, WireProtocol};
use std::sync::Arc;

/// Build the bridge selected by `config`. Nothing is started until the
/// first run.
pub fn build_bridge(config: &Config) -> Result<Arc<dyn InterpreterBridge>, BridgeError> {
    let bridge = &config.bridge;
    let built: Arc<dyn InterpreterBridge> = match bridge.kind {
        BridgeKind::Worker => {
            let command = WorkerCommand::new(bridge.program.clone(), bridge.args.clone());
            match bridge.protocol {
                WireProtocol::Json => Arc::new(JsonWorkerBridge::new(command)),
                WireProtocol::Stdio => Arc::new(StdioWorkerBridge::new(command)),
            }
        }
        BridgeKind::Wasm => {
            let module = config.module_path().ok_or_else(|| {
                BridgeError::Init("bridge.module is required for the wasm bridge".to_string())
            })?;
            Arc::new(WasmBridge::from_file(module, bridge.max_memory_bytes)?)
        }
    };

    tracing::debug!(bridge = built.name(), "interpreter bridge configured");
    Ok(built)
}
