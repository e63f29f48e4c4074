//! Process-wide log sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Installs the fmt subscriber with an `info` default, once per process.
pub fn install_log_sink() {
    install_log_sink_with("info");
}

/// Like [`install_log_sink`], with the directive used when `RUST_LOG` is unset.
///
/// Only the first call has any effect. If the host already set a global
/// subscriber that one is kept and events go to it.
pub fn install_log_sink_with(default_directive: &str) {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok();
        INSTALLED.store(installed, Ordering::Release);
        if installed {
            tracing::debug!(default_directive, "log sink installed");
        }
    });
}

/// Whether this crate's subscriber is the global one.
#[must_use]
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Acquire)
}
