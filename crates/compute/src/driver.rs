//! The boundary between the orchestration layer and a compute-device driver.
//!
//! A [`ComputeDriver`] exposes the handful of operations a dispatch needs.
//! Handles are released by dropping them, so the order in which the caller
//! drops them is the order in which the driver releases them. Creation calls
//! return `None` where the underlying API can hand back a null handle.
//! Requests that the driver completes later take a [`Callback`]; it may be
//! invoked inline, from a driver thread, or while the device is polled.

use crate::DriverError;
use std::sync::Arc;

pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Receives driver errors that no error scope captured.
pub type UncapturedErrorHandler = Arc<dyn Fn(DriverError) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFilter {
    Validation,
    OutOfMemory,
}

impl ErrorFilter {
    #[must_use]
    pub fn captures(self, kind: crate::DriverErrorKind) -> bool {
        matches!(
            (self, kind),
            (Self::Validation, crate::DriverErrorKind::Validation)
                | (Self::OutOfMemory, crate::DriverErrorKind::OutOfMemory)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    None,
    LowPower,
    #[default]
    HighPerformance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    /// GPU-resident, bound as read-write storage, copy source and destination.
    Storage,
    /// Host-readable, copy destination only.
    Staging,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferSpec<'a> {
    pub label: &'a str,
    pub size: u64,
    pub role: BufferRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSummary {
    pub name: String,
    pub backend: String,
    pub device_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterLimits {
    pub max_texture_dimension_1d: u32,
    pub max_texture_dimension_2d: u32,
    pub max_texture_dimension_3d: u32,
    pub max_texture_array_layers: u32,
    pub max_buffer_size: u64,
    pub max_storage_buffer_binding_size: u32,
    pub max_compute_workgroup_size_x: u32,
    pub max_compute_workgroup_size_y: u32,
    pub max_compute_workgroup_size_z: u32,
    pub max_compute_workgroups_per_dimension: u32,
}

impl AdapterLimits {
    /// Largest storage buffer a single dispatch can bind.
    #[must_use]
    pub fn max_dispatch_bytes(&self) -> u64 {
        self.max_buffer_size.min(u64::from(self.max_storage_buffer_binding_size))
    }

    /// Whether every dimension of `workgroups` fits a single dispatch.
    #[must_use]
    pub fn admits_workgroups(&self, workgroups: [u32; 3]) -> bool {
        workgroups.iter().all(|&count| count <= self.max_compute_workgroups_per_dimension)
    }
}

pub struct DeviceRequest<'a> {
    pub label: &'a str,
    pub on_uncaptured_error: UncapturedErrorHandler,
}

pub trait ComputeDriver: Send + Sync + 'static {
    type Instance;
    /// Delivered through a [`Callback`], so it must cross threads.
    type Adapter: Send;
    type Device: Send;
    type Queue;
    type ShaderModule;
    type Buffer;
    type ComputePipeline;
    type BindGroupLayout;
    type BindGroup;
    type CommandEncoder;
    type CommandBuffer;

    fn create_instance(&self) -> Option<Self::Instance>;

    fn request_adapter(
        &self,
        instance: &Self::Instance,
        power_preference: PowerPreference,
        callback: Callback<Result<Self::Adapter, String>>,
    );

    fn adapter_summary(&self, adapter: &Self::Adapter) -> AdapterSummary;

    fn adapter_limits(&self, adapter: &Self::Adapter) -> AdapterLimits;

    /// Requests a device; `request.on_uncaptured_error` stays installed for the device's lifetime.
    fn request_device(
        &self,
        adapter: &Self::Adapter,
        request: DeviceRequest<'_>,
        callback: Callback<Result<Self::Device, String>>,
    );

    fn device_queue(&self, device: &Self::Device) -> Option<Self::Queue>;

    /// Processes completed work and fires any callbacks that are ready. Never blocks.
    fn poll(&self, device: &Self::Device);

    fn push_error_scope(&self, device: &Self::Device, filter: ErrorFilter);

    fn pop_error_scope(&self, device: &Self::Device, callback: Callback<Option<DriverError>>);

    fn create_shader_module(
        &self,
        device: &Self::Device,
        label: &str,
        source: &str,
    ) -> Option<Self::ShaderModule>;

    fn create_buffer(&self, device: &Self::Device, spec: &BufferSpec<'_>) -> Option<Self::Buffer>;

    /// Creates a pipeline whose layout is derived from the module's declared bindings.
    fn create_compute_pipeline(
        &self,
        device: &Self::Device,
        label: &str,
        module: &Self::ShaderModule,
        entry_point: &str,
    ) -> Option<Self::ComputePipeline>;

    fn bind_group_layout(
        &self,
        pipeline: &Self::ComputePipeline,
        group: u32,
    ) -> Option<Self::BindGroupLayout>;

    fn create_bind_group(
        &self,
        device: &Self::Device,
        label: &str,
        layout: &Self::BindGroupLayout,
        binding: u32,
        buffer: &Self::Buffer,
    ) -> Option<Self::BindGroup>;

    fn create_command_encoder(&self, device: &Self::Device, label: &str) -> Option<Self::CommandEncoder>;

    /// Records one compute pass: set pipeline, set bind group, dispatch, end.
    fn encode_compute_pass(
        &self,
        encoder: &mut Self::CommandEncoder,
        pipeline: &Self::ComputePipeline,
        bind_group: &Self::BindGroup,
        workgroups: [u32; 3],
    );

    fn copy_buffer_to_buffer(
        &self,
        encoder: &mut Self::CommandEncoder,
        source: &Self::Buffer,
        destination: &Self::Buffer,
        size: u64,
    );

    /// Consumes the encoder.
    fn finish(&self, encoder: Self::CommandEncoder) -> Option<Self::CommandBuffer>;

    fn write_buffer(&self, queue: &Self::Queue, buffer: &Self::Buffer, data: &[u8]);

    /// Consumes the command buffer.
    fn submit(&self, queue: &Self::Queue, commands: Self::CommandBuffer);

    fn map_read(&self, buffer: &Self::Buffer, size: u64, callback: Callback<Result<(), String>>);

    /// Copies out the mapped range, or `None` if the buffer is not mapped.
    fn read_mapped(&self, buffer: &Self::Buffer, size: u64) -> Option<Vec<u8>>;

    fn unmap(&self, buffer: &Self::Buffer);
}
