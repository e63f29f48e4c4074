use crate::driver::{
    AdapterLimits, AdapterSummary, BufferRole, BufferSpec, Callback, ComputeDriver, DeviceRequest,
    ErrorFilter, PowerPreference,
};
use crate::{DriverError, DriverErrorKind};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// [`ComputeDriver`] backed by `wgpu`.
///
/// `WGPU_BACKEND` narrows the backends the instance enumerates,
/// `WGPU_ADAPTER_NAME` picks an adapter by name, and `WGPU_POWER_PREF`
/// overrides the configured power preference.
pub struct WgpuDriver {
    backends: wgpu::Backends,
}

impl Default for WgpuDriver {
    fn default() -> Self {
        Self { backends: wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all()) }
    }
}

impl WgpuDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_backends(backends: wgpu::Backends) -> Self {
        Self { backends }
    }
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: Arc<wgpu::Queue>,
}

/// A `wgpu` buffer plus whether its last `map_async` succeeded.
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    mapped: Arc<AtomicBool>,
}

impl WgpuBuffer {
    #[must_use]
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }
}

impl From<wgpu::Error> for DriverError {
    fn from(error: wgpu::Error) -> Self {
        let kind = match &error {
            wgpu::Error::OutOfMemory { .. } => DriverErrorKind::OutOfMemory,
            wgpu::Error::Validation { .. } => DriverErrorKind::Validation,
            #[allow(unreachable_patterns)]
            _ => DriverErrorKind::Internal,
        };
        Self::new(kind, error.to_string())
    }
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(preference: PowerPreference) -> Self {
        match preference {
            PowerPreference::None => Self::None,
            PowerPreference::LowPower => Self::LowPower,
            PowerPreference::HighPerformance => Self::HighPerformance,
        }
    }
}

impl ComputeDriver for WgpuDriver {
    type Instance = wgpu::Instance;
    type Adapter = wgpu::Adapter;
    type Device = WgpuDevice;
    type Queue = Arc<wgpu::Queue>;
    type ShaderModule = wgpu::ShaderModule;
    type Buffer = WgpuBuffer;
    type ComputePipeline = wgpu::ComputePipeline;
    type BindGroupLayout = wgpu::BindGroupLayout;
    type BindGroup = wgpu::BindGroup;
    type CommandEncoder = wgpu::CommandEncoder;
    type CommandBuffer = wgpu::CommandBuffer;

    fn create_instance(&self) -> Option<wgpu::Instance> {
        Some(wgpu::Instance::new(wgpu::InstanceDescriptor { backends: self.backends, ..Default::default() }))
    }

    fn request_adapter(
        &self,
        instance: &wgpu::Instance,
        power_preference: PowerPreference,
        callback: Callback<Result<wgpu::Adapter, String>>,
    ) {
        if let Some(adapter) = wgpu::util::initialize_adapter_from_env(instance, None) {
            callback(Ok(adapter));
            return;
        }
        let options = wgpu::RequestAdapterOptions {
            power_preference: wgpu::util::power_preference_from_env().unwrap_or_else(|| power_preference.into()),
            compatible_surface: None,
            force_fallback_adapter: false,
        };
        let adapter = pollster::block_on(instance.request_adapter(&options));
        callback(adapter.ok_or_else(|| format!("no adapter among {:?}", self.backends)));
    }

    fn adapter_summary(&self, adapter: &wgpu::Adapter) -> AdapterSummary {
        let info = adapter.get_info();
        AdapterSummary {
            name: info.name,
            backend: format!("{:?}", info.backend),
            device_type: format!("{:?}", info.device_type),
        }
    }

    fn adapter_limits(&self, adapter: &wgpu::Adapter) -> AdapterLimits {
        let limits = adapter.limits();
        AdapterLimits {
            max_texture_dimension_1d: limits.max_texture_dimension_1d,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_texture_dimension_3d: limits.max_texture_dimension_3d,
            max_texture_array_layers: limits.max_texture_array_layers,
            max_buffer_size: limits.max_buffer_size,
            max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size,
            max_compute_workgroup_size_x: limits.max_compute_workgroup_size_x,
            max_compute_workgroup_size_y: limits.max_compute_workgroup_size_y,
            max_compute_workgroup_size_z: limits.max_compute_workgroup_size_z,
            max_compute_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        }
    }

    fn request_device(
        &self,
        adapter: &wgpu::Adapter,
        request: DeviceRequest<'_>,
        callback: Callback<Result<WgpuDevice, String>>,
    ) {
        let descriptor = wgpu::DeviceDescriptor {
            label: Some(request.label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
        };
        let result = pollster::block_on(adapter.request_device(&descriptor, None))
            .map(|(device, queue)| {
                let handler = request.on_uncaptured_error;
                device.on_uncaptured_error(Box::new(move |error| handler(error.into())));
                WgpuDevice { device, queue: Arc::new(queue) }
            })
            .map_err(|err| err.to_string());
        callback(result);
    }

    fn device_queue(&self, device: &WgpuDevice) -> Option<Arc<wgpu::Queue>> {
        Some(Arc::clone(&device.queue))
    }

    fn poll(&self, device: &WgpuDevice) {
        let _ = device.device.poll(wgpu::Maintain::Poll);
    }

    fn push_error_scope(&self, device: &WgpuDevice, filter: ErrorFilter) {
        device.device.push_error_scope(match filter {
            ErrorFilter::Validation => wgpu::ErrorFilter::Validation,
            ErrorFilter::OutOfMemory => wgpu::ErrorFilter::OutOfMemory,
        });
    }

    fn pop_error_scope(&self, device: &WgpuDevice, callback: Callback<Option<DriverError>>) {
        let error = pollster::block_on(device.device.pop_error_scope());
        callback(error.map(DriverError::from));
    }

    fn create_shader_module(&self, device: &WgpuDevice, label: &str, source: &str) -> Option<wgpu::ShaderModule> {
        Some(device.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_owned())),
        }))
    }

    fn create_buffer(&self, device: &WgpuDevice, spec: &BufferSpec<'_>) -> Option<WgpuBuffer> {
        let usage = match spec.role {
            BufferRole::Storage => {
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
            }
            BufferRole::Staging => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        };
        let buffer = device.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(spec.label),
            size: spec.size,
            usage,
            mapped_at_creation: false,
        });
        Some(WgpuBuffer { buffer, mapped: Arc::new(AtomicBool::new(false)) })
    }

    fn create_compute_pipeline(
        &self,
        device: &WgpuDevice,
        label: &str,
        module: &wgpu::ShaderModule,
        entry_point: &str,
    ) -> Option<wgpu::ComputePipeline> {
        Some(device.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: None,
            module,
            entry_point,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }))
    }

    fn bind_group_layout(&self, pipeline: &wgpu::ComputePipeline, group: u32) -> Option<wgpu::BindGroupLayout> {
        Some(pipeline.get_bind_group_layout(group))
    }

    fn create_bind_group(
        &self,
        device: &WgpuDevice,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        binding: u32,
        buffer: &WgpuBuffer,
    ) -> Option<wgpu::BindGroup> {
        Some(device.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry { binding, resource: buffer.buffer.as_entire_binding() }],
        }))
    }

    fn create_command_encoder(&self, device: &WgpuDevice, label: &str) -> Option<wgpu::CommandEncoder> {
        Some(device.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) }))
    }

    fn encode_compute_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        workgroups: [u32; 3],
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("dispatch pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(crate::layout::BIND_GROUP, bind_group, &[]);
        pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
    }

    fn copy_buffer_to_buffer(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &WgpuBuffer,
        destination: &WgpuBuffer,
        size: u64,
    ) {
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &destination.buffer, 0, size);
    }

    fn finish(&self, encoder: wgpu::CommandEncoder) -> Option<wgpu::CommandBuffer> {
        Some(encoder.finish())
    }

    fn write_buffer(&self, queue: &Arc<wgpu::Queue>, buffer: &WgpuBuffer, data: &[u8]) {
        queue.write_buffer(&buffer.buffer, 0, data);
    }

    fn submit(&self, queue: &Arc<wgpu::Queue>, commands: wgpu::CommandBuffer) {
        queue.submit(std::iter::once(commands));
    }

    fn map_read(&self, buffer: &WgpuBuffer, size: u64, callback: Callback<Result<(), String>>) {
        let mapped = Arc::clone(&buffer.mapped);
        buffer.buffer.slice(..size).map_async(wgpu::MapMode::Read, move |result| {
            mapped.store(result.is_ok(), Ordering::Release);
            callback(result.map_err(|e| e.to_string()));
        });
    }

    fn read_mapped(&self, buffer: &WgpuBuffer, size: u64) -> Option<Vec<u8>> {
        if !buffer.is_mapped() {
            return None;
        }
        Some(buffer.buffer.slice(..size).get_mapped_range().to_vec())
    }

    fn unmap(&self, buffer: &WgpuBuffer) {
        buffer.mapped.store(false, Ordering::Release);
        buffer.buffer.unmap();
    }
}
