//! Newline-delimited JSON framing for the worker event protocol.
//!
//! Each command and each event is a single JSON object on its own line.

use playground_types::{BridgeCommand, BridgeEvent, UnknownEventType, WireEvent};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event line: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    UnknownType(#[from] UnknownEventType),
}

/// Encode a command as one line, including the trailing newline
pub fn encode_command(command: &BridgeCommand) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(command)?;
    line.push('\n');
    Ok(line)
}

/// Decode one event line. Blank lines decode to `None`.
pub fn decode_event(line: &str) -> Result<Option<BridgeEvent>, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let wire: WireEvent = serde_json::from_str(line)?;
    Ok(Some(BridgeEvent::try_from(wire)?))
}
