//! Two channels through which the driver reports errors.
//!
//! [`ErrorSink`] is the fallback: the device's uncaptured-error handler feeds
//! it for the whole life of the session, so it carries no notion of which
//! call caused an error. The dispatch pipeline resets it when a dispatch
//! starts and drains it after every guarded stage.
//!
//! [`ErrorScope`] brackets one operation with push/pop and yields the error
//! captured in between as a [`ScopeOutcome`].

use crate::bridge::{await_completion, BridgeOptions};
use crate::driver::{ComputeDriver, ErrorFilter, UncapturedErrorHandler};
use crate::{ComputeError, DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct SinkState {
    raised: AtomicBool,
    last: Mutex<Option<DriverError>>,
    total: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct ErrorSink {
    state: Arc<SinkState>,
}

impl ErrorSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler to install on the device; it may be called from any thread.
    #[must_use]
    pub fn handler(&self) -> UncapturedErrorHandler {
        let sink = self.clone();
        Arc::new(move |error| sink.raise(error))
    }

    pub fn raise(&self, error: DriverError) {
        tracing::warn!(kind = ?error.kind, message = %error.message, "uncaptured driver error");
        *self.state.last.lock() = Some(error);
        self.state.total.fetch_add(1, Ordering::Relaxed);
        self.state.raised.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.state.raised.load(Ordering::Acquire)
    }

    /// Clears the flag and returns the error that set it, if any.
    pub fn take(&self) -> Option<DriverError> {
        if !self.state.raised.swap(false, Ordering::AcqRel) {
            return None;
        }
        let last = self.state.last.lock().take();
        Some(last.unwrap_or_else(|| DriverError::new(DriverErrorKind::Internal, "uncaptured driver error")))
    }

    pub fn reset(&self) {
        if let Some(stale) = self.take() {
            tracing::debug!(message = %stale.message, "discarding stale uncaptured error");
        }
    }

    /// Number of uncaptured errors seen since the sink was created.
    #[must_use]
    pub fn total(&self) -> usize {
        self.state.total.load(Ordering::Relaxed)
    }
}

/// What an error scope and the global sink saw while one operation ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeOutcome {
    pub scope_error: Option<DriverError>,
    pub uncaptured: Option<DriverError>,
}

impl ScopeOutcome {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.scope_error.is_none() && self.uncaptured.is_none()
    }

    #[must_use]
    pub fn into_error(self) -> Option<DriverError> {
        self.scope_error.or(self.uncaptured)
    }
}

/// A pushed error scope. Dropping it without [`ErrorScope::finish`] still pops it.
pub struct ErrorScope<'a, D: ComputeDriver> {
    driver: &'a D,
    device: &'a D::Device,
    open: bool,
}

impl<'a, D: ComputeDriver> ErrorScope<'a, D> {
    pub fn push(driver: &'a D, device: &'a D::Device, filter: ErrorFilter) -> Self {
        driver.push_error_scope(device, filter);
        Self { driver, device, open: true }
    }

    /// Pops the scope, waiting for the driver if it reports asynchronously,
    /// and drains the global sink.
    ///
    /// # Errors
    ///
    /// Propagates bridge failures (timeout, cancellation) from waiting on the pop.
    pub fn finish(mut self, sink: &ErrorSink, options: &BridgeOptions) -> Result<ScopeOutcome, ComputeError> {
        self.open = false;
        let (driver, device) = (self.driver, self.device);
        let scope_error = await_completion(
            "error scope pop",
            options,
            |token| driver.pop_error_scope(device, Box::new(move |error| token.complete(error))),
            || driver.poll(device),
        )?;
        Ok(ScopeOutcome { scope_error, uncaptured: sink.take() })
    }
}

impl<D: ComputeDriver> Drop for ErrorScope<'_, D> {
    fn drop(&mut self) {
        if self.open {
            self.driver.pop_error_scope(self.device, Box::new(|_| {}));
        }
    }
}
