//! The asynchronous boundary to the external interpreter.

use crate::locations::normalize_diagnostic;
use async_trait::async_trait;
use futures::stream::BoxStream;
use playground_types::BridgeEvent;
use thiserror::Error;

/// Logged to the output pane when a run is cancelled by `stop`
pub const FORCE_STOP_MESSAGE: &str = "force stopped manually";

/// Events of one run, ending with [`BridgeEvent::Done`] or
/// [`BridgeEvent::Fatal`]
pub type EventStream = BoxStream<'static, BridgeEvent>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to initialize interpreter: {0}")]
    Init(String),

    #[error("Interpreter I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("A run is already in flight")]
    Busy,

    #[error("No run is waiting for input")]
    NotAwaitingInput,

    #[error("{0} is not supported by this interpreter bridge")]
    Unsupported(&'static str),
}

/// An out-of-process interpreter.
///
/// At most one run is in flight per bridge; callers serialize access.
/// Initialization is lazy and memoized: the first `run` (or an explicit
/// `ensure_ready`) loads the interpreter, and concurrent first callers share
/// that single load.
#[async_trait]
pub trait InterpreterBridge: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Load the interpreter if it is not loaded yet
    async fn ensure_ready(&self) -> Result<(), BridgeError>;

    /// Start running `code`, returning its event stream
    async fn run(&self, code: &str) -> Result<EventStream, BridgeError>;

    /// Cancel the in-flight run. No effect when nothing is running.
    async fn stop(&self) -> Result<(), BridgeError>;

    /// Resume a run suspended on [`BridgeEvent::Input`]
    async fn provide_input(&self, value: &str) -> Result<(), BridgeError>;
}

/// Rewrite diagnostic wording before an event reaches the output log
pub fn normalize_event(event: BridgeEvent) -> BridgeEvent {
    match event {
        BridgeEvent::Error(text) => BridgeEvent::Error(normalize_diagnostic(&text)),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted bridge for orchestrator tests.

    use super::*;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    /// Replays a fixed script of events per run. A held-open stream never
    /// terminates by itself, like a program stuck in a loop.
    #[derive(Default)]
    pub struct ScriptedBridge {
        script: Mutex<Vec<BridgeEvent>>,
        hold_open: bool,
        fail_init: bool,
        stop_ends_stream: bool,
        pub runs: Mutex<Vec<String>>,
        pub inputs: Mutex<Vec<String>>,
        stops: AtomicUsize,
        sender: Mutex<Option<mpsc::UnboundedSender<BridgeEvent>>>,
    }

    impl ScriptedBridge {
        pub fn new(script: Vec<BridgeEvent>) -> Self {
            Self {
                script: Mutex::new(script),
                ..Default::default()
            }
        }

        pub fn hold_open(mut self) -> Self {
            self.hold_open = true;
            self
        }

        pub fn stop_ends_stream(mut self) -> Self {
            self.stop_ends_stream = true;
            self
        }

        pub fn fail_init(mut self) -> Self {
            self.fail_init = true;
            self
        }

        pub fn stop_count(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InterpreterBridge for ScriptedBridge {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn ensure_ready(&self) -> Result<(), BridgeError> {
            if self.fail_init {
                Err(BridgeError::Init("module not found".to_string()))
            } else {
                Ok(())
            }
        }

        async fn run(&self, code: &str) -> Result<EventStream, BridgeError> {
            self.ensure_ready().await?;
            self.runs.lock().push(code.to_string());

            let (tx, rx) = mpsc::unbounded_channel();
            for event in self.script.lock().iter().cloned() {
                let _ = tx.send(event);
            }
            if self.hold_open {
                *self.sender.lock() = Some(tx);
            }
            Ok(UnboundedReceiverStream::new(rx).boxed())
        }

        async fn stop(&self) -> Result<(), BridgeError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            let sender = self.sender.lock().take();
            if let Some(tx) = sender {
                if self.stop_ends_stream {
                    let _ = tx.send(BridgeEvent::Log(FORCE_STOP_MESSAGE.to_string()));
                    let _ = tx.send(BridgeEvent::Done);
                } else {
                    // Unresponsive: the stream stays open
                    *self.sender.lock() = Some(tx);
                }
            }
            Ok(())
        }

        async fn provide_input(&self, value: &str) -> Result<(), BridgeError> {
            self.inputs.lock().push(value.to_string());
            if let Some(tx) = self.sender.lock().as_ref() {
                let _ = tx.send(BridgeEvent::Log(format!("got {value}")));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_event_only_touches_errors() {
        assert_eq!(
            normalize_event(BridgeEvent::Error(
                "[line 1] Error at ')': Expect expression.".to_string()
            )),
            BridgeEvent::Error("[line 1] Error at ')': Expected expression.".to_string())
        );
        assert_eq!(
            normalize_event(BridgeEvent::Log("Expect nothing".to_string())),
            BridgeEvent::Log("Expect nothing".to_string())
        );
    }
}
