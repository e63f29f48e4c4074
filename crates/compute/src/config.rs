use crate::bridge::BridgeOptions;
use crate::driver::PowerPreference;
use std::time::Duration;

pub const POLL_MS_VAR: &str = "GPU_COMPUTE_POLL_MS";
pub const TIMEOUT_MS_VAR: &str = "GPU_COMPUTE_TIMEOUT_MS";
pub const ENTRY_POINT_VAR: &str = "GPU_COMPUTE_ENTRY_POINT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeConfig {
    /// Sleep between completion checks while waiting on the driver.
    pub poll_interval: Duration,
    /// Upper bound on any single wait; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub entry_point: String,
    pub power_preference: PowerPreference,
    pub install_log_sink: bool,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            timeout: Some(Duration::from_secs(30)),
            entry_point: "main".to_owned(),
            power_preference: PowerPreference::HighPerformance,
            install_log_sink: true,
        }
    }
}

impl ComputeConfig {
    /// Defaults overlaid with the `GPU_COMPUTE_*` environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Overlays values found through `lookup`. Unparseable values are ignored with a warning.
    #[must_use]
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse_millis(POLL_MS_VAR, lookup(POLL_MS_VAR)) {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_millis(TIMEOUT_MS_VAR, lookup(TIMEOUT_MS_VAR)) {
            self.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(entry) = lookup(ENTRY_POINT_VAR).filter(|e| !e.trim().is_empty()) {
            self.entry_point = entry.trim().to_owned();
        }
        self
    }

    #[must_use]
    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions { poll_interval: self.poll_interval, timeout: self.timeout, cancel: None }
    }
}

fn parse_millis(key: &str, value: Option<String>) -> Option<u64> {
    let value = value?;
    match value.trim().parse() {
        Ok(ms) => Some(ms),
        Err(e) => {
            tracing::warn!(key, value, "ignoring unparseable setting: {e}");
            None
        }
    }
}
