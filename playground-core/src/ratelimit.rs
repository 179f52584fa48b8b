//! Rate limiting for run dispatch.
//!
//! [`Throttle`] is leading-edge: the first call goes through immediately and
//! later calls are dropped until `delay` has passed since the last accepted
//! one. [`Debouncer`] is trailing-edge: the callback fires once, with the last
//! argument, after `delay` has elapsed with no new call.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Leading-edge throttle
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_call: Mutex::new(None),
        }
    }

    /// Returns true (and records the call) if a call is allowed right now
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_call.lock();
        match *last {
            Some(prev) if now.duration_since(prev) < self.delay => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Run `f` unless throttled
    pub fn call<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self.try_acquire() {
            Some(f())
        } else {
            None
        }
    }

    /// Time until the next call would be accepted
    pub fn time_until_available(&self) -> Duration {
        match *self.last_call.lock() {
            Some(prev) => self.delay.saturating_sub(Instant::now().duration_since(prev)),
            None => Duration::ZERO,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

type DebouncedFn<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Trailing-edge debounce. Must be used from within a tokio runtime.
pub struct Debouncer<T> {
    delay: Duration,
    callback: DebouncedFn<T>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(delay: Duration, callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            delay,
            callback: Arc::new(callback),
            pending: Mutex::new(None),
        }
    }

    /// Schedule the callback with `arg`, replacing any pending invocation
    pub fn call(&self, arg: T) {
        let mut pending = self.pending.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }

        let callback = Arc::clone(&self.callback);
        let delay = self.delay;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback(arg);
        }));
    }

    /// Drop the pending invocation, if any
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}
