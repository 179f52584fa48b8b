use super::WorkerCommand;
use crate::protocol::{decode_event, encode_command};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use playground_core::bridge::{
    normalize_event, BridgeError, EventStream, InterpreterBridge, FORCE_STOP_MESSAGE,
};
use playground_types::{BridgeCommand, BridgeEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::instrument;

/// How long a worker gets to honor a `stop` command before it is killed
const STOP_ACK_TIMEOUT: Duration = Duration::from_millis(250);

/// Sender of the in-flight run, tagged with the generation of the process
/// serving it. Output of a killed process never reaches a later run.
type RunSink = Arc<Mutex<Option<(u64, mpsc::UnboundedSender<BridgeEvent>)>>>;

struct WorkerProcess {
    generation: u64,
    child: Child,
    stdin: ChildStdin,
    reader: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

/// Long-lived interpreter process speaking newline-delimited JSON
pub struct JsonWorkerBridge {
    command: WorkerCommand,
    process: tokio::sync::Mutex<Option<WorkerProcess>>,
    sink: RunSink,
    finished: Arc<Notify>,
    generation: AtomicU64,
}

impl JsonWorkerBridge {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            process: tokio::sync::Mutex::new(None),
            sink: Arc::new(Mutex::new(None)),
            finished: Arc::new(Notify::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn spawn(&self) -> Result<WorkerProcess, BridgeError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut child = self.command.piped().spawn().map_err(|e| {
            BridgeError::Init(format!("failed to start `{}`: {}", self.command, e))
        })?;

        let missing = |stream: &str| BridgeError::Init(format!("worker {stream} is not piped"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let reader = tokio::spawn(read_events(
            generation,
            stdout,
            Arc::clone(&self.sink),
            Arc::clone(&self.finished),
        ));
        let stderr = tokio::spawn(forward_stderr(stderr));

        tracing::info!(command = %self.command, pid = ?child.id(), generation, "interpreter worker started");
        Ok(WorkerProcess {
            generation,
            child,
            stdin,
            reader,
            stderr,
        })
    }

    /// The live worker in `slot`, starting one if there is none or the last
    /// one exited
    async fn ready_process<'a>(
        &self,
        slot: &'a mut Option<WorkerProcess>,
    ) -> Result<&'a mut WorkerProcess, BridgeError> {
        let alive = match slot.as_mut() {
            Some(process) => matches!(process.child.try_wait(), Ok(None)),
            None => false,
        };
        if !alive {
            if let Some(old) = slot.take() {
                tracing::warn!(generation = old.generation, "interpreter worker exited, restarting");
                kill(old).await;
            }
            *slot = Some(self.spawn()?);
        }
        slot.as_mut()
            .ok_or_else(|| BridgeError::Init("interpreter worker unavailable".to_string()))
    }

    fn owns_run(&self, generation: u64) -> bool {
        matches!(self.sink.lock().as_ref(), Some((owner, _)) if *owner == generation)
    }
}

#[async_trait]
impl InterpreterBridge for JsonWorkerBridge {
    fn name(&self) -> &'static str {
        "worker-json"
    }

    async fn ensure_ready(&self) -> Result<(), BridgeError> {
        let mut slot = self.process.lock().await;
        self.ready_process(&mut slot).await?;
        Ok(())
    }

    #[instrument(skip(self, code), fields(bytes = code.len()))]
    async fn run(&self, code: &str) -> Result<EventStream, BridgeError> {
        let mut slot = self.process.lock().await;
        let process = self.ready_process(&mut slot).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut sink = self.sink.lock();
            if sink.is_some() {
                return Err(BridgeError::Busy);
            }
            *sink = Some((process.generation, tx));
        }

        let command = BridgeCommand::Run {
            code: code.to_string(),
        };
        if let Err(err) = send(process, &command).await {
            tracing::error!("Failed to send run command: {}", err);
            self.sink.lock().take();
            if let Some(old) = slot.take() {
                kill(old).await;
            }
            return Err(err);
        }

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    /// Ask the worker to stop, then kill and restart it if it does not
    /// finish the run in time
    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), BridgeError> {
        let generation = match self.sink.lock().as_ref() {
            Some((generation, _)) => *generation,
            None => return Ok(()),
        };

        let mut slot = self.process.lock().await;
        let finished = self.finished.notified();
        if let Some(process) = slot.as_mut() {
            if let Err(err) = send(process, &BridgeCommand::Stop).await {
                tracing::debug!("stop command not delivered: {}", err);
            }
        }
        if self.owns_run(generation) {
            let _ = tokio::time::timeout(STOP_ACK_TIMEOUT, finished).await;
        }
        if !self.owns_run(generation) {
            tracing::debug!(generation, "worker stopped the run itself");
            return Ok(());
        }

        let sender = self.sink.lock().take();
        if let Some(old) = slot.take() {
            kill(old).await;
        }
        if let Some((_, tx)) = sender {
            let _ = tx.send(BridgeEvent::Log(FORCE_STOP_MESSAGE.to_string()));
            let _ = tx.send(BridgeEvent::Done);
        }

        *slot = Some(self.spawn()?);
        tracing::info!("interpreter worker restarted after stop");
        Ok(())
    }

    async fn provide_input(&self, value: &str) -> Result<(), BridgeError> {
        if self.sink.lock().is_none() {
            return Err(BridgeError::NotAwaitingInput);
        }
        let mut slot = self.process.lock().await;
        let process = slot.as_mut().ok_or(BridgeError::NotAwaitingInput)?;
        send(
            process,
            &BridgeCommand::InputResult {
                data: value.to_string(),
            },
        )
        .await
    }
}

async fn send(process: &mut WorkerProcess, command: &BridgeCommand) -> Result<(), BridgeError> {
    let line = encode_command(command)?;
    process.stdin.write_all(line.as_bytes()).await?;
    process.stdin.flush().await?;
    Ok(())
}

async fn kill(mut process: WorkerProcess) {
    if let Err(err) = process.child.kill().await {
        tracing::warn!(generation = process.generation, "Failed to kill interpreter worker: {}", err);
    }
    process.reader.abort();
    process.stderr.abort();
}

async fn read_events(generation: u64, stdout: ChildStdout, sink: RunSink, finished: Arc<Notify>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(generation, "Failed to read from interpreter worker: {}", err);
                break;
            }
        };

        match decode_event(&line) {
            Ok(Some(event)) => deliver(generation, &sink, &finished, normalize_event(event)),
            Ok(None) => {}
            Err(err) => tracing::warn!(generation, line = %line, "Skipping worker output: {}", err),
        }
    }

    tracing::debug!(generation, "interpreter worker output closed");
    deliver(
        generation,
        &sink,
        &finished,
        BridgeEvent::Fatal("interpreter process exited unexpectedly".to_string()),
    );
}

fn deliver(generation: u64, sink: &RunSink, finished: &Notify, event: BridgeEvent) {
    let mut sink = sink.lock();
    let Some((owner, tx)) = sink.as_ref() else {
        tracing::debug!(kind = event.kind(), "worker event outside a run, dropping");
        return;
    };
    if *owner != generation {
        return;
    }

    let terminal = event.is_terminal();
    let _ = tx.send(event);
    if terminal {
        *sink = None;
        drop(sink);
        finished.notify_waiters();
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "playground::worker", "{}", line);
    }
}
