//! Long-lived driver handles shared by every dispatch.

use crate::bridge::{await_completion, BridgeOptions};
use crate::driver::{AdapterLimits, AdapterSummary, ComputeDriver, DeviceRequest};
use crate::error_sink::ErrorSink;
use crate::{logging, ComputeConfig, ComputeError};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// Some handles were acquired before startup failed.
    Partial,
    Ready,
}

/// What the adapter is and what it allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterReport {
    pub summary: AdapterSummary,
    pub limits: AdapterLimits,
}

impl fmt::Display for AdapterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let AdapterReport { summary, limits } = self;
        writeln!(f, "adapter:                        {}", summary.name)?;
        writeln!(f, "backend:                        {}", summary.backend)?;
        writeln!(f, "device type:                    {}", summary.device_type)?;
        writeln!(f, "max texture dimension 1d:       {}", limits.max_texture_dimension_1d)?;
        writeln!(f, "max texture dimension 2d:       {}", limits.max_texture_dimension_2d)?;
        writeln!(f, "max texture dimension 3d:       {}", limits.max_texture_dimension_3d)?;
        writeln!(f, "max texture array layers:       {}", limits.max_texture_array_layers)?;
        writeln!(f, "max buffer size:                {}", limits.max_buffer_size)?;
        writeln!(f, "max storage buffer binding:     {}", limits.max_storage_buffer_binding_size)?;
        writeln!(f, "max workgroups per dimension:   {}", limits.max_compute_workgroups_per_dimension)?;
        write!(
            f,
            "max compute workgroup size:     {} x {} x {}",
            limits.max_compute_workgroup_size_x,
            limits.max_compute_workgroup_size_y,
            limits.max_compute_workgroup_size_z
        )
    }
}

/// Instance, adapter, device and queue, acquired in that order and released in reverse.
///
/// A failed [`Session::startup`] keeps whatever it acquired so that
/// [`Session::shutdown`] can release it.
pub struct Session<D: ComputeDriver> {
    driver: Arc<D>,
    errors: ErrorSink,
    instance: Option<D::Instance>,
    adapter: Option<D::Adapter>,
    device: Option<D::Device>,
    queue: Option<D::Queue>,
    report: Option<AdapterReport>,
}

/// Borrowed view of a ready session, handed to the dispatch pipeline.
pub struct DispatchContext<'s, D: ComputeDriver> {
    pub driver: &'s D,
    pub device: &'s D::Device,
    pub queue: &'s D::Queue,
    pub errors: &'s ErrorSink,
    pub limits: AdapterLimits,
    pub entry_point: &'s str,
    pub bridge: BridgeOptions,
}

impl<D: ComputeDriver> Session<D> {
    #[must_use]
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            errors: ErrorSink::new(),
            instance: None,
            adapter: None,
            device: None,
            queue: None,
            report: None,
        }
    }

    #[must_use]
    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    #[must_use]
    pub fn error_sink(&self) -> &ErrorSink {
        &self.errors
    }

    #[must_use]
    pub fn has_started(&self) -> bool {
        self.instance.is_some()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        match (&self.instance, &self.queue) {
            (None, _) => SessionState::Uninitialized,
            (Some(_), Some(_)) => SessionState::Ready,
            (Some(_), None) => SessionState::Partial,
        }
    }

    #[must_use]
    pub fn adapter_report(&self) -> Option<&AdapterReport> {
        self.report.as_ref()
    }

    /// Acquires every handle. A no-op once the session is ready; a partial
    /// session from an earlier failure is released and acquired again.
    ///
    /// # Errors
    ///
    /// Fails with the first handle that could not be acquired, or with a
    /// bridge error if the driver never answered.
    pub fn startup(&mut self, config: &ComputeConfig) -> Result<(), ComputeError> {
        match self.state() {
            SessionState::Ready => {
                tracing::debug!("session already started");
                return Ok(());
            }
            SessionState::Partial => {
                tracing::info!("releasing partial session before retrying startup");
                self.shutdown();
            }
            SessionState::Uninitialized => {}
        }
        if config.install_log_sink {
            logging::install_log_sink();
        }
        let options = config.bridge_options();
        let driver = Arc::clone(&self.driver);

        let instance = self.instance.insert(driver.create_instance().ok_or(ComputeError::InstanceUnavailable)?);

        let adapter = await_completion(
            "adapter request",
            &options,
            |token| driver.request_adapter(instance, config.power_preference, Box::new(move |r| token.complete(r))),
            || {},
        )?
        .map_err(ComputeError::AdapterUnavailable)?;
        let adapter = self.adapter.insert(adapter);

        let report = AdapterReport { summary: driver.adapter_summary(adapter), limits: driver.adapter_limits(adapter) };
        tracing::info!(
            name = %report.summary.name,
            backend = %report.summary.backend,
            device_type = %report.summary.device_type,
            "adapter acquired"
        );
        tracing::debug!(limits = ?report.limits, "adapter limits");
        self.report = Some(report);

        let handler = self.errors.handler();
        let device = await_completion(
            "device request",
            &options,
            |token| {
                let request = DeviceRequest { label: "gpu-compute device", on_uncaptured_error: handler };
                driver.request_device(adapter, request, Box::new(move |r| token.complete(r)));
            },
            || {},
        )?
        .map_err(ComputeError::DeviceUnavailable)?;
        let device = self.device.insert(device);

        self.queue = Some(driver.device_queue(device).ok_or(ComputeError::QueueUnavailable)?);
        tracing::info!("session started");
        Ok(())
    }

    /// Releases queue, device, adapter and instance, skipping any that are absent.
    pub fn shutdown(&mut self) {
        if !self.has_started() {
            return;
        }
        drop(self.queue.take());
        drop(self.device.take());
        drop(self.adapter.take());
        drop(self.instance.take());
        self.report = None;
        tracing::info!("session shut down");
    }

    /// # Errors
    ///
    /// [`ComputeError::SessionUnavailable`] unless startup completed.
    pub fn dispatch_context<'s>(&'s self, config: &'s ComputeConfig) -> Result<DispatchContext<'s, D>, ComputeError> {
        let (Some(device), Some(queue), Some(report)) = (&self.device, &self.queue, &self.report) else {
            return Err(ComputeError::SessionUnavailable);
        };
        Ok(DispatchContext {
            driver: &self.driver,
            device,
            queue,
            errors: &self.errors,
            limits: report.limits,
            entry_point: &config.entry_point,
            bridge: config.bridge_options(),
        })
    }
}

impl<D: ComputeDriver> Drop for Session<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
