//! Deterministic in-process [`ComputeDriver`].
//!
//! WGSL is parsed and validated with `naga`, pipelines derive their bind
//! group layout from the module's declared globals, and errors are routed to
//! error scopes or the uncaptured handler the way a WebGPU implementation
//! routes them. Kernels are not executed: a dispatch applies the host
//! emulation registered under the name of a function the module declares.
//!
//! Every handle carries a [`LiveToken`] so tests can check that each handle
//! created was released, and in which order.

use crate::driver::{
    AdapterLimits, AdapterSummary, BufferRole, BufferSpec, Callback, ComputeDriver, DeviceRequest,
    ErrorFilter, PowerPreference, UncapturedErrorHandler,
};
use crate::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub type HostKernel = Arc<dyn Fn(i32) -> i32 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Instance,
    Adapter,
    Device,
    Queue,
    ShaderModule,
    Buffer,
    ComputePipeline,
    BindGroupLayout,
    BindGroup,
    CommandEncoder,
    CommandBuffer,
}

impl ArtifactKind {
    #[must_use]
    pub const fn is_session_handle(self) -> bool {
        matches!(self, Self::Instance | Self::Adapter | Self::Device | Self::Queue)
    }
}

#[derive(Default)]
pub struct ArtifactLedger {
    counts: Mutex<HashMap<ArtifactKind, (usize, usize)>>,
    releases: Mutex<Vec<ArtifactKind>>,
}

impl ArtifactLedger {
    fn acquire(self: &Arc<Self>, kind: ArtifactKind) -> LiveToken {
        self.counts.lock().entry(kind).or_default().0 += 1;
        LiveToken { kind, ledger: Arc::clone(self) }
    }

    fn release(&self, kind: ArtifactKind) {
        self.counts.lock().entry(kind).or_default().1 += 1;
        self.releases.lock().push(kind);
    }

    #[must_use]
    pub fn created(&self, kind: ArtifactKind) -> usize {
        self.counts.lock().get(&kind).map_or(0, |c| c.0)
    }

    #[must_use]
    pub fn released(&self, kind: ArtifactKind) -> usize {
        self.counts.lock().get(&kind).map_or(0, |c| c.1)
    }

    #[must_use]
    pub fn live(&self, kind: ArtifactKind) -> usize {
        self.counts.lock().get(&kind).map_or(0, |c| c.0 - c.1)
    }

    /// Live handles that belong to a dispatch rather than to the session.
    #[must_use]
    pub fn live_dispatch_artifacts(&self) -> usize {
        self.counts
            .lock()
            .iter()
            .filter(|(kind, _)| !kind.is_session_handle())
            .map(|(_, c)| c.0 - c.1)
            .sum()
    }

    #[must_use]
    pub fn release_log(&self) -> Vec<ArtifactKind> {
        self.releases.lock().clone()
    }

    pub fn clear_release_log(&self) {
        self.releases.lock().clear();
    }
}

pub struct LiveToken {
    kind: ArtifactKind,
    ledger: Arc<ArtifactLedger>,
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.ledger.release(self.kind);
    }
}

/// Failures the mock can be told to produce.
#[derive(Debug, Clone, Default)]
pub struct MockFaults {
    pub no_instance: bool,
    pub no_adapter: bool,
    pub no_device: bool,
    pub no_queue: bool,
    pub no_buffers: bool,
    /// Shader module creation returns a null handle and reports nothing.
    pub null_module: bool,
    /// Shader compilation raises an internal error no validation scope captures.
    pub uncaptured_on_compile: bool,
    pub map_error: bool,
    /// Buffer maps are accepted but never complete.
    pub stall_map: bool,
    /// Adapter and device callbacks arrive from another thread after this delay.
    pub callback_latency: Option<Duration>,
}

pub struct MockDriver {
    ledger: Arc<ArtifactLedger>,
    faults: Mutex<MockFaults>,
    emulations: Mutex<HashMap<String, HostKernel>>,
    limits: AdapterLimits,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: Arc::default(),
            faults: Mutex::default(),
            emulations: Mutex::default(),
            limits: AdapterLimits {
                max_texture_dimension_1d: 8192,
                max_texture_dimension_2d: 8192,
                max_texture_dimension_3d: 2048,
                max_texture_array_layers: 256,
                max_buffer_size: 256 << 20,
                max_storage_buffer_binding_size: 128 << 20,
                max_compute_workgroup_size_x: 256,
                max_compute_workgroup_size_y: 256,
                max_compute_workgroup_size_z: 64,
                max_compute_workgroups_per_dimension: 65_535,
            },
        }
    }

    #[must_use]
    pub fn with_faults(self, faults: MockFaults) -> Self {
        *self.faults.lock() = faults;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: AdapterLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Registers the element-wise host equivalent of any kernel declaring a function named `function`.
    #[must_use]
    pub fn with_emulation(self, function: &str, kernel: impl Fn(i32) -> i32 + Send + Sync + 'static) -> Self {
        self.emulations.lock().insert(function.to_owned(), Arc::new(kernel));
        self
    }

    /// Registers emulations for every kernel shipped in [`crate::kernels`].
    #[must_use]
    pub fn with_bundled_emulations(self) -> Self {
        crate::kernels::host_emulations()
            .into_iter()
            .fold(self, |driver, (name, kernel)| driver.with_emulation(name, kernel))
    }

    #[must_use]
    pub fn limits(&self) -> AdapterLimits {
        self.limits
    }

    pub fn set_faults(&self, faults: MockFaults) {
        *self.faults.lock() = faults;
    }

    #[must_use]
    pub fn faults(&self) -> MockFaults {
        self.faults.lock().clone()
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<ArtifactLedger> {
        &self.ledger
    }

    fn deliver<T: Send + 'static>(&self, callback: Callback<T>, value: T) {
        match self.faults.lock().callback_latency {
            Some(latency) => {
                std::thread::spawn(move || {
                    std::thread::sleep(latency);
                    callback(value);
                });
            }
            None => callback(value),
        }
    }

    fn compile(&self, source: &str) -> Result<ShaderProgram, DriverError> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| DriverError::validation(e.emit_to_string(source)))?;
        naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
            .validate(&module)
            .map_err(|e| DriverError::validation(e.emit_to_string(source)))?;

        let bindings = module
            .global_variables
            .iter()
            .filter_map(|(_, global)| {
                let binding = global.binding.as_ref()?;
                let (storage, read_write) = match global.space {
                    naga::AddressSpace::Storage { access } => (true, access.contains(naga::StorageAccess::STORE)),
                    _ => (false, false),
                };
                Some(DeclaredBinding { group: binding.group, binding: binding.binding, storage, read_write })
            })
            .collect();
        let entry_points = module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
            .map(|ep| (ep.name.clone(), ep.workgroup_size))
            .collect();
        let emulations = self.emulations.lock();
        let emulation = module
            .functions
            .iter()
            .filter_map(|(_, function)| function.name.as_deref())
            .find_map(|name| emulations.get(name).cloned());

        Ok(ShaderProgram { entry_points, bindings, emulation })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeclaredBinding {
    group: u32,
    binding: u32,
    storage: bool,
    read_write: bool,
}

struct ShaderProgram {
    entry_points: Vec<(String, [u32; 3])>,
    bindings: Vec<DeclaredBinding>,
    emulation: Option<HostKernel>,
}

struct Scope {
    filter: ErrorFilter,
    error: Option<DriverError>,
}

struct DeviceState {
    scopes: Mutex<Vec<Scope>>,
    on_uncaptured_error: UncapturedErrorHandler,
    pending_maps: Mutex<Vec<Arc<BufferState>>>,
}

impl DeviceState {
    // The innermost scope whose filter matches takes the error; it keeps only the first.
    fn report(&self, error: DriverError) {
        let mut scopes = self.scopes.lock();
        if let Some(scope) = scopes.iter_mut().rev().find(|s| s.filter.captures(error.kind)) {
            scope.error.get_or_insert(error);
            return;
        }
        drop(scopes);
        (self.on_uncaptured_error)(error);
    }
}

type PendingMap = (Callback<Result<(), String>>, Result<(), String>);

struct BufferState {
    size: u64,
    role: BufferRole,
    contents: Mutex<Vec<u8>>,
    mapped: AtomicBool,
    pending_map: Mutex<Option<PendingMap>>,
    device: Weak<DeviceState>,
}

pub struct MockInstance {
    _live: LiveToken,
}

pub struct MockAdapter {
    _live: LiveToken,
}

pub struct MockDevice {
    _live: LiveToken,
    state: Arc<DeviceState>,
}

pub struct MockQueue {
    _live: LiveToken,
}

pub struct MockShaderModule {
    _live: LiveToken,
    program: Option<Arc<ShaderProgram>>,
}

pub struct MockBuffer {
    _live: LiveToken,
    state: Arc<BufferState>,
}

pub struct MockComputePipeline {
    _live: LiveToken,
    program: Option<Arc<ShaderProgram>>,
    device: Arc<DeviceState>,
}

pub struct MockBindGroupLayout {
    _live: LiveToken,
    entries: Option<Vec<DeclaredBinding>>,
}

pub struct MockBindGroup {
    _live: LiveToken,
    target: Option<Arc<BufferState>>,
}

enum Command {
    Dispatch { kernel: Option<HostKernel>, target: Option<Arc<BufferState>>, invocations: u64 },
    Copy { source: Arc<BufferState>, destination: Arc<BufferState>, size: u64 },
}

pub struct MockCommandEncoder {
    _live: LiveToken,
    commands: Vec<Command>,
}

pub struct MockCommandBuffer {
    _live: LiveToken,
    commands: Vec<Command>,
}

impl ComputeDriver for MockDriver {
    type Instance = MockInstance;
    type Adapter = MockAdapter;
    type Device = MockDevice;
    type Queue = MockQueue;
    type ShaderModule = MockShaderModule;
    type Buffer = MockBuffer;
    type ComputePipeline = MockComputePipeline;
    type BindGroupLayout = MockBindGroupLayout;
    type BindGroup = MockBindGroup;
    type CommandEncoder = MockCommandEncoder;
    type CommandBuffer = MockCommandBuffer;

    fn create_instance(&self) -> Option<MockInstance> {
        if self.faults.lock().no_instance {
            return None;
        }
        Some(MockInstance { _live: self.ledger.acquire(ArtifactKind::Instance) })
    }

    fn request_adapter(
        &self,
        _instance: &MockInstance,
        _power_preference: PowerPreference,
        callback: Callback<Result<MockAdapter, String>>,
    ) {
        let result = if self.faults.lock().no_adapter {
            Err("no adapter matched the request".to_owned())
        } else {
            Ok(MockAdapter { _live: self.ledger.acquire(ArtifactKind::Adapter) })
        };
        self.deliver(callback, result);
    }

    fn adapter_summary(&self, _adapter: &MockAdapter) -> AdapterSummary {
        AdapterSummary { name: "mock adapter".to_owned(), backend: "Mock".to_owned(), device_type: "Cpu".to_owned() }
    }

    fn adapter_limits(&self, _adapter: &MockAdapter) -> AdapterLimits {
        self.limits
    }

    fn request_device(
        &self,
        _adapter: &MockAdapter,
        request: DeviceRequest<'_>,
        callback: Callback<Result<MockDevice, String>>,
    ) {
        let result = if self.faults.lock().no_device {
            Err(format!("device '{}' could not be created", request.label))
        } else {
            Ok(MockDevice {
                _live: self.ledger.acquire(ArtifactKind::Device),
                state: Arc::new(DeviceState {
                    scopes: Mutex::default(),
                    on_uncaptured_error: request.on_uncaptured_error,
                    pending_maps: Mutex::default(),
                }),
            })
        };
        self.deliver(callback, result);
    }

    fn device_queue(&self, _device: &MockDevice) -> Option<MockQueue> {
        if self.faults.lock().no_queue {
            return None;
        }
        Some(MockQueue { _live: self.ledger.acquire(ArtifactKind::Queue) })
    }

    fn poll(&self, device: &MockDevice) {
        let ready: Vec<_> = device.state.pending_maps.lock().drain(..).collect();
        for buffer in ready {
            let pending = buffer.pending_map.lock().take();
            if let Some((callback, result)) = pending {
                buffer.mapped.store(result.is_ok(), Ordering::Release);
                callback(result);
            }
        }
    }

    fn push_error_scope(&self, device: &MockDevice, filter: ErrorFilter) {
        device.state.scopes.lock().push(Scope { filter, error: None });
    }

    fn pop_error_scope(&self, device: &MockDevice, callback: Callback<Option<DriverError>>) {
        let popped = device.state.scopes.lock().pop();
        match popped {
            Some(scope) => callback(scope.error),
            None => callback(Some(DriverError::validation("pop_error_scope called with no scope pushed"))),
        }
    }

    fn create_shader_module(&self, device: &MockDevice, label: &str, source: &str) -> Option<MockShaderModule> {
        let faults = self.faults();
        if faults.null_module {
            return None;
        }
        if faults.uncaptured_on_compile {
            device.state.report(DriverError::new(DriverErrorKind::Internal, format!("backend compiler crashed on '{label}'")));
        }
        let program = match self.compile(source) {
            Ok(program) => Some(Arc::new(program)),
            Err(error) => {
                device.state.report(error);
                None
            }
        };
        Some(MockShaderModule { _live: self.ledger.acquire(ArtifactKind::ShaderModule), program })
    }

    fn create_buffer(&self, device: &MockDevice, spec: &BufferSpec<'_>) -> Option<MockBuffer> {
        if self.faults.lock().no_buffers {
            return None;
        }
        let Ok(len) = usize::try_from(spec.size) else {
            device.state.report(DriverError::new(DriverErrorKind::OutOfMemory, format!("'{}' is too large", spec.label)));
            return None;
        };
        if spec.size > self.limits.max_buffer_size {
            device.state.report(DriverError::validation(format!(
                "'{}' size {} exceeds max_buffer_size {}",
                spec.label, spec.size, self.limits.max_buffer_size
            )));
        }
        Some(MockBuffer {
            _live: self.ledger.acquire(ArtifactKind::Buffer),
            state: Arc::new(BufferState {
                size: spec.size,
                role: spec.role,
                contents: Mutex::new(vec![0; len]),
                mapped: AtomicBool::new(false),
                pending_map: Mutex::new(None),
                device: Arc::downgrade(&device.state),
            }),
        })
    }

    fn create_compute_pipeline(
        &self,
        device: &MockDevice,
        label: &str,
        module: &MockShaderModule,
        entry_point: &str,
    ) -> Option<MockComputePipeline> {
        let program = match &module.program {
            None => {
                device.state.report(DriverError::validation(format!("'{label}' uses an invalid shader module")));
                None
            }
            Some(program) => match program.entry_points.iter().find(|(name, _)| name == entry_point) {
                None => {
                    device.state.report(DriverError::validation(format!(
                        "'{label}': no compute entry point named '{entry_point}'"
                    )));
                    None
                }
                Some(_) => Some(Arc::clone(program)),
            },
        };
        Some(MockComputePipeline {
            _live: self.ledger.acquire(ArtifactKind::ComputePipeline),
            program,
            device: Arc::clone(&device.state),
        })
    }

    fn bind_group_layout(&self, pipeline: &MockComputePipeline, group: u32) -> Option<MockBindGroupLayout> {
        let entries = match &pipeline.program {
            Some(program) => Some(program.bindings.iter().copied().filter(|b| b.group == group).collect()),
            None => {
                pipeline.device.report(DriverError::validation("bind group layout requested from an invalid pipeline"));
                None
            }
        };
        Some(MockBindGroupLayout { _live: self.ledger.acquire(ArtifactKind::BindGroupLayout), entries })
    }

    fn create_bind_group(
        &self,
        device: &MockDevice,
        label: &str,
        layout: &MockBindGroupLayout,
        binding: u32,
        buffer: &MockBuffer,
    ) -> Option<MockBindGroup> {
        let target = match &layout.entries {
            None => {
                device.state.report(DriverError::validation(format!("'{label}' uses an invalid layout")));
                None
            }
            Some(entries) => match entries.as_slice() {
                [only] if only.binding == binding && only.storage && only.read_write => {
                    if buffer.state.role == BufferRole::Storage {
                        Some(Arc::clone(&buffer.state))
                    } else {
                        device.state.report(DriverError::validation(format!(
                            "'{label}': buffer bound at {binding} lacks STORAGE usage"
                        )));
                        None
                    }
                }
                _ => {
                    device.state.report(DriverError::validation(format!(
                        "'{label}': layout declares {} binding(s), bind group provides one read-write storage buffer at {binding}",
                        entries.len()
                    )));
                    None
                }
            },
        };
        Some(MockBindGroup { _live: self.ledger.acquire(ArtifactKind::BindGroup), target })
    }

    fn create_command_encoder(&self, _device: &MockDevice, _label: &str) -> Option<MockCommandEncoder> {
        Some(MockCommandEncoder { _live: self.ledger.acquire(ArtifactKind::CommandEncoder), commands: Vec::new() })
    }

    fn encode_compute_pass(
        &self,
        encoder: &mut MockCommandEncoder,
        pipeline: &MockComputePipeline,
        bind_group: &MockBindGroup,
        workgroups: [u32; 3],
    ) {
        if !self.limits.admits_workgroups(workgroups) {
            pipeline.device.report(DriverError::validation(format!(
                "dispatch of {workgroups:?} workgroups exceeds the per-dimension limit of {}",
                self.limits.max_compute_workgroups_per_dimension
            )));
            return;
        }
        let size = pipeline
            .program
            .as_ref()
            .and_then(|p| p.entry_points.first().map(|(_, size)| *size))
            .unwrap_or([1, 1, 1]);
        let invocations = workgroups
            .iter()
            .zip(size)
            .map(|(&count, size)| u64::from(count) * u64::from(size))
            .product();
        encoder.commands.push(Command::Dispatch {
            kernel: pipeline.program.as_ref().and_then(|p| p.emulation.clone()),
            target: bind_group.target.clone(),
            invocations,
        });
    }

    fn copy_buffer_to_buffer(
        &self,
        encoder: &mut MockCommandEncoder,
        source: &MockBuffer,
        destination: &MockBuffer,
        size: u64,
    ) {
        encoder.commands.push(Command::Copy {
            source: Arc::clone(&source.state),
            destination: Arc::clone(&destination.state),
            size,
        });
    }

    fn finish(&self, encoder: MockCommandEncoder) -> Option<MockCommandBuffer> {
        let MockCommandEncoder { _live: recorded, commands } = encoder;
        drop(recorded);
        Some(MockCommandBuffer { _live: self.ledger.acquire(ArtifactKind::CommandBuffer), commands })
    }

    fn write_buffer(&self, _queue: &MockQueue, buffer: &MockBuffer, data: &[u8]) {
        let mut contents = buffer.state.contents.lock();
        let len = data.len().min(contents.len());
        contents[..len].copy_from_slice(&data[..len]);
    }

    fn submit(&self, _queue: &MockQueue, commands: MockCommandBuffer) {
        for command in &commands.commands {
            match command {
                Command::Dispatch { kernel: Some(kernel), target: Some(target), invocations } => {
                    let mut contents = target.contents.lock();
                    let mut values: Vec<i32> = bytemuck::pod_collect_to_vec(&contents);
                    let count = usize::try_from(*invocations).unwrap_or(usize::MAX).min(values.len());
                    for value in &mut values[..count] {
                        *value = kernel(*value);
                    }
                    contents.copy_from_slice(bytemuck::cast_slice(&values));
                }
                Command::Dispatch { .. } => {
                    tracing::trace!("mock dispatch without emulation or binding leaves memory untouched");
                }
                Command::Copy { source, destination, size } => {
                    if Arc::ptr_eq(source, destination) {
                        continue;
                    }
                    let len = usize::try_from(*size).unwrap_or(usize::MAX);
                    let from = source.contents.lock();
                    let mut to = destination.contents.lock();
                    let len = len.min(from.len()).min(to.len());
                    to[..len].copy_from_slice(&from[..len]);
                }
            }
        }
    }

    fn map_read(&self, buffer: &MockBuffer, size: u64, callback: Callback<Result<(), String>>) {
        let faults = self.faults();
        let result = if buffer.state.role != BufferRole::Staging {
            Err("buffer was not created with MAP_READ usage".to_owned())
        } else if size > buffer.state.size {
            Err(format!("map range {size} exceeds buffer size {}", buffer.state.size))
        } else if faults.map_error {
            Err("device lost while mapping".to_owned())
        } else {
            Ok(())
        };
        *buffer.state.pending_map.lock() = Some((callback, result));
        if faults.stall_map {
            return;
        }
        if let Some(device) = buffer.state.device.upgrade() {
            device.pending_maps.lock().push(Arc::clone(&buffer.state));
        }
    }

    fn read_mapped(&self, buffer: &MockBuffer, size: u64) -> Option<Vec<u8>> {
        if !buffer.state.mapped.load(Ordering::Acquire) {
            return None;
        }
        let len = usize::try_from(size).ok()?;
        buffer.state.contents.lock().get(..len).map(<[u8]>::to_vec)
    }

    fn unmap(&self, buffer: &MockBuffer) {
        buffer.state.mapped.store(false, Ordering::Release);
    }
}
