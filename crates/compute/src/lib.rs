#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_panics_doc)]

pub mod backend;
pub mod bridge;
pub mod component;
pub mod config;
pub mod driver;
mod error;
pub mod error_sink;
pub mod kernels;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod session;

pub use bridge::{await_completion, BridgeOptions, CancelToken, CompletionToken};
pub use component::ComputeComponent;
pub use config::ComputeConfig;
pub use driver::{ComputeDriver, PowerPreference};
pub use error::{ComputeError, DriverError, DriverErrorKind};
pub use error_sink::{ErrorScope, ErrorSink, ScopeOutcome};
pub use pipeline::{DispatchReport, DispatchRequest, DispatchStage};
pub use session::{AdapterReport, Session, SessionState};

#[cfg(feature = "mock")]
pub use backend::MockDriver;
#[cfg(feature = "gpu")]
pub use backend::WgpuDriver;
