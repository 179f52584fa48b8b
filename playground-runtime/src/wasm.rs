//! WASM interpreter bridge
//!
//! The interpreter is a WebAssembly module compiled once with wasmtime and
//! instantiated fresh for every run. Guest ABI:
//!
//! - exports `memory`, `alloc(len: i32) -> i32` and `run(ptr: i32, len: i32)`
//! - imports `playground:runtime/events` `emit(kind: i32, ptr: i32, len: i32)`
//!   where kind is 0 for log, 1 for error and 2 for fatal
//!
//! The host copies the UTF-8 source into guest memory at the pointer returned
//! by `alloc` and calls `run`. Stop is delivered through epoch interruption.

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use playground_core::bridge::{
    normalize_event, BridgeError, EventStream, InterpreterBridge, FORCE_STOP_MESSAGE,
};
use playground_types::BridgeEvent;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::instrument;
use wasmtime::{
    Caller, Config, Engine, Extern, Linker, Module, ResourceLimiter, Store, Trap, UpdateDeadline,
};

/// Import module name of the event sink
pub const EVENTS_MODULE: &str = "playground:runtime/events";

const EMIT_LOG: i32 = 0;
const EMIT_ERROR: i32 = 1;
const EMIT_FATAL: i32 = 2;

/// Where the interpreter module comes from
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// A `.wasm` (or `.wat`) file, read on first use
    File(PathBuf),
    /// Module bytes already in memory
    Bytes(Arc<[u8]>),
}

/// Per-run host state
struct HostState {
    events: mpsc::UnboundedSender<BridgeEvent>,
    max_memory_bytes: usize,
}

impl ResourceLimiter for HostState {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= self.max_memory_bytes)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= 10_000)
    }
}

pub struct WasmBridge {
    source: ModuleSource,
    max_memory_bytes: usize,
    engine: Engine,
    linker: Arc<Linker<HostState>>,
    module: OnceCell<Module>,
    /// Cancellation flag of the in-flight run
    current: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl WasmBridge {
    pub fn new(source: ModuleSource, max_memory_bytes: usize) -> Result<Self, BridgeError> {
        let mut config = Config::new();
        config.epoch_interruption(true);

        let engine = Engine::new(&config).map_err(|e| BridgeError::Init(format!("{e:#}")))?;
        let mut linker = Linker::new(&engine);
        register_event_imports(&mut linker).map_err(|e| BridgeError::Init(format!("{e:#}")))?;

        Ok(Self {
            source,
            max_memory_bytes,
            engine,
            linker: Arc::new(linker),
            module: OnceCell::new(),
            current: Arc::new(Mutex::new(None)),
        })
    }

    pub fn from_file(path: impl Into<PathBuf>, max_memory_bytes: usize) -> Result<Self, BridgeError> {
        Self::new(ModuleSource::File(path.into()), max_memory_bytes)
    }

    /// Compile the module on first use; a failed compile is retried next time
    async fn module(&self) -> Result<&Module, BridgeError> {
        self.module
            .get_or_try_init(|| async {
                let engine = self.engine.clone();
                let source = self.source.clone();
                let module = tokio::task::spawn_blocking(move || match &source {
                    ModuleSource::File(path) => Module::from_file(&engine, path)
                        .map_err(|e| anyhow!("{}: {e:#}", path.display())),
                    ModuleSource::Bytes(bytes) => Module::new(&engine, bytes),
                })
                .await
                .map_err(|e| BridgeError::Init(format!("module compilation panicked: {e}")))?
                .map_err(|e| BridgeError::Init(format!("{e:#}")))?;

                tracing::info!("interpreter module compiled");
                Ok::<_, BridgeError>(module)
            })
            .await
    }
}

fn register_event_imports(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    // events::emit(kind: i32, ptr: i32, len: i32)
    linker.func_wrap(
        EVENTS_MODULE,
        "emit",
        |mut caller: Caller<'_, HostState>, kind: i32, ptr: i32, len: i32| -> anyhow::Result<()> {
            let mem = match caller.get_export("memory") {
                Some(Extern::Memory(m)) => m,
                _ => bail!("interpreter module does not export memory"),
            };

            let start = ptr as u32 as usize;
            let end = start.saturating_add(len as u32 as usize);
            let text = mem
                .data(&caller)
                .get(start..end)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .ok_or_else(|| anyhow!("emit range {start}..{end} is outside guest memory"))?;

            let event = match kind {
                EMIT_LOG => BridgeEvent::Log(text),
                EMIT_ERROR => BridgeEvent::Error(text),
                EMIT_FATAL => BridgeEvent::Fatal(text),
                other => bail!("unknown event kind {other}"),
            };
            let _ = caller.data().events.send(normalize_event(event));
            Ok(())
        },
    )?;
    Ok(())
}

/// Instantiate the module and run `code` to completion on the current thread
fn execute(
    engine: &Engine,
    linker: &Linker<HostState>,
    module: &Module,
    host: HostState,
    code: &str,
    cancelled: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let mut store = Store::new(engine, host);
    store.limiter(|state| state as &mut dyn ResourceLimiter);

    // Every epoch tick checks the flag, so a stop aimed at an earlier run
    // cannot interrupt this one
    store.set_epoch_deadline(1);
    let flag = Arc::clone(&cancelled);
    store.epoch_deadline_callback(move |_| {
        if flag.load(Ordering::SeqCst) {
            Err(Trap::Interrupt.into())
        } else {
            Ok(UpdateDeadline::Continue(1))
        }
    });
    if cancelled.load(Ordering::SeqCst) {
        return Err(Trap::Interrupt.into());
    }

    let instance = linker.instantiate(&mut store, module)?;
    let memory = instance
        .get_memory(&mut store, "memory")
        .ok_or_else(|| anyhow!("interpreter module does not export memory"))?;
    let alloc = instance.get_typed_func::<i32, i32>(&mut store, "alloc")?;
    let run = instance.get_typed_func::<(i32, i32), ()>(&mut store, "run")?;

    let len = i32::try_from(code.len()).map_err(|_| anyhow!("source is too large"))?;
    let ptr = alloc.call(&mut store, len)?;
    memory.write(&mut store, ptr as u32 as usize, code.as_bytes())?;
    run.call(&mut store, (ptr, len))?;
    Ok(())
}

#[async_trait]
impl InterpreterBridge for WasmBridge {
    fn name(&self) -> &'static str {
        "wasm"
    }

    async fn ensure_ready(&self) -> Result<(), BridgeError> {
        self.module().await.map(|_| ())
    }

    #[instrument(skip(self, code), fields(bytes = code.len()))]
    async fn run(&self, code: &str) -> Result<EventStream, BridgeError> {
        let module = self.module().await?.clone();

        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut current = self.current.lock();
            if current.is_some() {
                return Err(BridgeError::Busy);
            }
            *current = Some(Arc::clone(&cancelled));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let host = HostState {
            events: tx.clone(),
            max_memory_bytes: self.max_memory_bytes,
        };
        let engine = self.engine.clone();
        let linker = Arc::clone(&self.linker);
        let current = Arc::clone(&self.current);
        let code = code.to_string();

        tokio::task::spawn_blocking(move || {
            let result = execute(&engine, &linker, &module, host, &code, Arc::clone(&cancelled));
            let stopped = cancelled.load(Ordering::SeqCst);

            {
                let mut current = current.lock();
                if matches!(current.as_ref(), Some(flag) if Arc::ptr_eq(flag, &cancelled)) {
                    *current = None;
                }
            }

            match result {
                Err(_) if stopped => {
                    let _ = tx.send(BridgeEvent::Log(FORCE_STOP_MESSAGE.to_string()));
                    let _ = tx.send(BridgeEvent::Done);
                }
                Err(err) => {
                    tracing::error!("interpreter module trapped: {err:#}");
                    let _ = tx.send(BridgeEvent::Fatal(format!("{err:#}")));
                }
                Ok(()) => {
                    let _ = tx.send(BridgeEvent::Done);
                }
            }
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), BridgeError> {
        if let Some(flag) = self.current.lock().as_ref() {
            flag.store(true, Ordering::SeqCst);
            self.engine.increment_epoch();
        }
        Ok(())
    }

    async fn provide_input(&self, _value: &str) -> Result<(), BridgeError> {
        Err(BridgeError::Unsupported("input"))
    }
}
