use std::time::Duration;
use thiserror::Error;

/// Class of a failure reported by the driver, either through an error scope
/// or through the uncaptured-error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverErrorKind {
    Validation,
    OutOfMemory,
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?} error: {message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    #[must_use]
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Validation, message)
    }
}

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("could not create a compute instance")]
    InstanceUnavailable,
    #[error("could not acquire an adapter: {0}")]
    AdapterUnavailable(String),
    #[error("could not acquire a device: {0}")]
    DeviceUnavailable(String),
    #[error("device returned no queue")]
    QueueUnavailable,
    #[error("session is not ready (startup failed or was never completed)")]
    SessionUnavailable,
    #[error("kernel compilation failed: {message}")]
    Compilation { message: String },
    #[error("kernel compilation produced no module and reported no error")]
    ModuleMissing,
    #[error("buffer creation failed: {0}")]
    BufferCreation(String),
    #[error("input of {bytes} bytes exceeds the adapter buffer limit of {limit} bytes")]
    InputTooLarge { bytes: u64, limit: u64 },
    #[error("input of {elements} elements needs more workgroups than the adapter limit of {limit} per dimension")]
    TooManyWorkgroups { elements: usize, limit: u32 },
    #[error("binding failed: {0}")]
    Binding(String),
    #[error("command encoding failed: {0}")]
    Encoding(&'static str),
    #[error("buffer map failed: {0}")]
    Map(String),
    #[error("{operation} did not complete within {waited:?}")]
    Timeout { operation: &'static str, waited: Duration },
    #[error("driver dropped the {operation} callback without invoking it")]
    CallbackDropped { operation: &'static str },
    #[error("{operation} was cancelled")]
    Cancelled { operation: &'static str },
}
