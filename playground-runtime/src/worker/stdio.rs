use super::WorkerCommand;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use playground_core::bridge::{
    normalize_event, BridgeError, EventStream, InterpreterBridge, FORCE_STOP_MESSAGE,
};
use playground_types::BridgeEvent;
use std::io::Write;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::instrument;

/// How long a killed run may keep flushing output; a process that inherited
/// the pipes can hold them open long after the interpreter is gone
const KILL_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

struct ActiveRun {
    id: u64,
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    kill: Option<oneshot::Sender<()>>,
}

type ActiveSlot = Arc<Mutex<Option<ActiveRun>>>;

/// Runs each program in a fresh interpreter process.
///
/// The source is written to a temporary file passed as the last argument.
/// Lines on stdout become log events and lines on stderr become error events;
/// the two streams are read independently, so their relative order is not
/// preserved.
pub struct StdioWorkerBridge {
    command: WorkerCommand,
    active: ActiveSlot,
    next_id: AtomicU64,
}

impl StdioWorkerBridge {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl InterpreterBridge for StdioWorkerBridge {
    fn name(&self) -> &'static str {
        "worker-stdio"
    }

    /// Nothing to load ahead of time; each run starts its own process
    async fn ensure_ready(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    #[instrument(skip(self, code), fields(bytes = code.len()))]
    async fn run(&self, code: &str) -> Result<EventStream, BridgeError> {
        if self.active.lock().is_some() {
            return Err(BridgeError::Busy);
        }

        let mut source = tempfile::Builder::new()
            .prefix("playground-")
            .suffix(".lox")
            .tempfile()?;
        source.write_all(code.as_bytes())?;
        source.flush()?;

        let mut command = self.command.piped();
        command.arg(source.path());
        let mut child = command.spawn().map_err(|e| {
            BridgeError::Init(format!("failed to start `{}`: {}", self.command, e))
        })?;

        let missing = |stream: &str| BridgeError::Init(format!("interpreter {stream} is not piped"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (kill_tx, kill_rx) = oneshot::channel();
        {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(BridgeError::Busy);
            }
            *active = Some(ActiveRun {
                id,
                stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
                kill: Some(kill_tx),
            });
        }
        tracing::debug!(run = id, pid = ?child.id(), "interpreter process started");

        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            id,
            readers: [
                forward_lines(stdout, tx.clone(), BridgeEvent::Log),
                forward_lines(stderr, tx.clone(), BridgeEvent::Error),
            ],
            child,
            source,
            events: tx,
            kill: kill_rx,
            active: Arc::clone(&self.active),
        };
        tokio::spawn(supervisor.run());

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), BridgeError> {
        let kill = self.active.lock().as_mut().and_then(|run| run.kill.take());
        if let Some(kill) = kill {
            let _ = kill.send(());
        }
        Ok(())
    }

    /// Write `value` as one line to the running program's stdin
    async fn provide_input(&self, value: &str) -> Result<(), BridgeError> {
        let stdin = self
            .active
            .lock()
            .as_ref()
            .map(|run| Arc::clone(&run.stdin))
            .ok_or(BridgeError::NotAwaitingInput)?;

        let mut stdin = stdin.lock().await;
        stdin.write_all(value.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

/// Owns one interpreter process until it exits or is killed
struct Supervisor {
    id: u64,
    child: Child,
    readers: [JoinHandle<()>; 2],
    /// Deleted when the run ends
    source: NamedTempFile,
    events: mpsc::UnboundedSender<BridgeEvent>,
    kill: oneshot::Receiver<()>,
    active: ActiveSlot,
}

impl Supervisor {
    async fn run(mut self) {
        let status = tokio::select! {
            status = self.child.wait() => Some(status),
            _ = &mut self.kill => None,
        };

        if status.is_none() {
            if let Err(err) = self.child.kill().await {
                tracing::warn!(run = self.id, "Failed to kill interpreter: {}", err);
            }
            let drain = futures::future::join_all(self.readers.iter_mut());
            if tokio::time::timeout(KILL_DRAIN_TIMEOUT, drain).await.is_err() {
                tracing::debug!(run = self.id, "output still open after kill, detaching readers");
                for reader in &self.readers {
                    reader.abort();
                }
            }
        } else {
            for reader in self.readers.iter_mut() {
                let _ = reader.await;
            }
        }

        let last = match status {
            None => Some(BridgeEvent::Log(FORCE_STOP_MESSAGE.to_string())),
            Some(Ok(status)) => exit_diagnostic(status).map(BridgeEvent::Error),
            Some(Err(err)) => Some(BridgeEvent::Fatal(format!(
                "failed to wait for interpreter: {err}"
            ))),
        };

        {
            let mut active = self.active.lock();
            if matches!(active.as_ref(), Some(run) if run.id == self.id) {
                *active = None;
            }
        }

        let fatal = matches!(last, Some(BridgeEvent::Fatal(_)));
        if let Some(event) = last {
            let _ = self.events.send(event);
        }
        if !fatal {
            let _ = self.events.send(BridgeEvent::Done);
        }

        tracing::debug!(run = self.id, source = %self.source.path().display(), "interpreter process finished");
    }
}

/// Error line reported for an unsuccessful exit
fn exit_diagnostic(status: ExitStatus) -> Option<String> {
    if status.success() {
        return None;
    }
    Some(match status.code() {
        Some(code) => format!("exit code: {code}"),
        None => "exit code: terminated by signal".to_string(),
    })
}

fn forward_lines<R>(
    reader: R,
    events: mpsc::UnboundedSender<BridgeEvent>,
    wrap: fn(String) -> BridgeEvent,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let _ = events.send(normalize_event(wrap(line)));
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!("Failed to read interpreter output: {}", err);
                    break;
                }
            }
        }
    })
}
