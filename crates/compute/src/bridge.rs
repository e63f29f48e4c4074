//! Blocking wrapper around callback-driven driver requests.
//!
//! Every asynchronous driver call (adapter request, device request, error
//! scope pop, buffer map) hands a [`CompletionToken`] to the driver and then
//! parks in [`await_completion`] until the driver's callback fills it in.
//! The callback may run inline, on a driver thread, or only after the device
//! has been polled; the waiting side only ever observes the token.

use crate::ComputeError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Slot<T> {
    done: AtomicBool,
    result: Mutex<Option<T>>,
}

/// Single-use completion cell shared between a driver callback and the waiting thread.
pub struct CompletionToken<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for CompletionToken<T> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<T> CompletionToken<T> {
    fn new() -> Self {
        Self {
            slot: Arc::new(Slot { done: AtomicBool::new(false), result: Mutex::new(None) }),
        }
    }

    /// Stores the result and marks the request as finished. Later calls are ignored.
    pub fn complete(&self, value: T) {
        let mut result = self.slot.result.lock();
        if self.slot.done.load(Ordering::Acquire) {
            return;
        }
        *result = Some(value);
        self.slot.done.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.slot.done.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<T> {
        if self.is_done() {
            self.slot.result.lock().take()
        } else {
            None
        }
    }

    // Only the waiting side still holds the slot: the driver dropped its callback.
    fn abandoned(&self) -> bool {
        Arc::strong_count(&self.slot) == 1 && !self.is_done()
    }
}

/// Cooperative cancellation flag checked on every poll of the bridge.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub poll_interval: Duration,
    /// `None` waits for as long as the driver takes.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            timeout: Some(Duration::from_secs(30)),
            cancel: None,
        }
    }
}

/// Submits an asynchronous request and blocks until its callback completes it.
///
/// `submit` receives the token to move into the driver callback. `pump` runs
/// between checks and is where callers drive the device event loop when the
/// driver only delivers callbacks while being polled.
///
/// # Errors
///
/// Returns [`ComputeError::Timeout`] once `options.timeout` elapses,
/// [`ComputeError::Cancelled`] when the cancel token is raised, and
/// [`ComputeError::CallbackDropped`] if the driver drops the callback without
/// ever invoking it.
pub fn await_completion<T, S, P>(
    operation: &'static str,
    options: &BridgeOptions,
    submit: S,
    mut pump: P,
) -> Result<T, ComputeError>
where
    S: FnOnce(CompletionToken<T>),
    P: FnMut(),
{
    let token = CompletionToken::new();
    submit(token.clone());

    let started = Instant::now();
    loop {
        if let Some(value) = token.take() {
            return Ok(value);
        }
        pump();
        if let Some(value) = token.take() {
            return Ok(value);
        }
        if token.abandoned() {
            tracing::error!(operation, "driver dropped the completion callback");
            return Err(ComputeError::CallbackDropped { operation });
        }
        if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(ComputeError::Cancelled { operation });
        }
        let waited = started.elapsed();
        if options.timeout.is_some_and(|limit| waited >= limit) {
            tracing::error!(operation, ?waited, "driver callback never fired");
            return Err(ComputeError::Timeout { operation, waited });
        }
        std::thread::sleep(options.poll_interval);
    }
}
