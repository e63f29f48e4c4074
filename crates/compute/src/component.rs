use crate::driver::ComputeDriver;
use crate::pipeline::{self, DispatchReport, DispatchRequest};
use crate::session::{AdapterReport, Session};
use crate::{ComputeConfig, ComputeError};
use std::sync::Arc;

/// Blocking compute API over an asynchronous driver.
///
/// Dispatch takes `&mut self`: one dispatch at a time per component. The
/// session starts on first use if [`ComputeComponent::startup`] was not
/// called, and is shut down on drop.
pub struct ComputeComponent<D: ComputeDriver> {
    session: Session<D>,
    config: ComputeConfig,
    last_report: Option<DispatchReport>,
}

impl<D: ComputeDriver> ComputeComponent<D> {
    #[must_use]
    pub fn new(driver: Arc<D>, config: ComputeConfig) -> Self {
        Self { session: Session::new(driver), config, last_report: None }
    }

    #[must_use]
    pub fn config(&self) -> &ComputeConfig {
        &self.config
    }

    #[must_use]
    pub fn session(&self) -> &Session<D> {
        &self.session
    }

    /// # Errors
    ///
    /// See [`Session::startup`].
    pub fn startup(&mut self) -> Result<(), ComputeError> {
        self.session.startup(&self.config)
    }

    pub fn shutdown(&mut self) {
        self.session.shutdown();
    }

    #[must_use]
    pub fn has_started(&self) -> bool {
        self.session.has_started()
    }

    #[must_use]
    pub fn adapter_report(&self) -> Option<&AdapterReport> {
        self.session.adapter_report()
    }

    /// Report of the most recent dispatch that reached the driver.
    #[must_use]
    pub fn last_report(&self) -> Option<&DispatchReport> {
        self.last_report.as_ref()
    }

    /// Runs `kernel_source` over `input` and returns one output element per input element.
    ///
    /// # Errors
    ///
    /// Any failure of startup or of a dispatch stage; every artifact the
    /// dispatch created has been released by the time this returns.
    pub fn try_dispatch(&mut self, kernel_source: &str, input: &[i32]) -> Result<Vec<i32>, ComputeError> {
        if !self.session.has_started() {
            tracing::info!("starting session on first dispatch");
            self.session.startup(&self.config)?;
        }
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let ctx = self.session.dispatch_context(&self.config)?;
        let (result, report) = pipeline::execute(&ctx, &DispatchRequest { kernel_source, input });
        tracing::debug!(
            stage = ?report.final_stage(),
            created = report.artifacts_created,
            released = report.artifacts_released,
            "dispatch finished"
        );
        self.last_report = Some(report);
        result
    }

    /// Like [`ComputeComponent::try_dispatch`], but logs the failure and returns an empty vector.
    pub fn run_dispatch(&mut self, kernel_source: &str, input: &[i32]) -> Vec<i32> {
        self.try_dispatch(kernel_source, input).unwrap_or_else(|e| {
            tracing::error!("dispatch failed: {e}");
            Vec::new()
        })
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::backend::mock_driver::{ArtifactKind, MockDriver};
    use crate::kernels;

    fn component() -> (Arc<MockDriver>, ComputeComponent<MockDriver>) {
        let driver = Arc::new(MockDriver::new().with_bundled_emulations());
        let config = ComputeConfig { install_log_sink: false, ..ComputeConfig::default() };
        (Arc::clone(&driver), ComputeComponent::new(driver, config))
    }

    #[test]
    fn empty_input_touches_nothing_but_the_session() {
        let (driver, mut compute) = component();
        assert_eq!(compute.try_dispatch(kernels::DOUBLE, &[]).unwrap(), Vec::<i32>::new());
        assert!(compute.has_started());
        assert_eq!(driver.ledger().created(ArtifactKind::ShaderModule), 0);
        assert!(compute.last_report().is_none());
    }

    #[test]
    fn run_dispatch_swallows_errors() {
        let (_, mut compute) = component();
        assert!(compute.run_dispatch("not wgsl at all", &[1, 2]).is_empty());
        assert!(compute.last_report().is_some_and(DispatchReport::is_balanced));
    }

    #[test]
    fn drop_shuts_the_session_down() {
        let (driver, mut compute) = component();
        compute.startup().unwrap();
        drop(compute);
        assert_eq!(driver.ledger().live(ArtifactKind::Instance), 0);
    }
}
