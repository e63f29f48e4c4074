//! One dispatch: compile, allocate, bind, encode, submit, map, release.
//!
//! Every handle created along the way is held in [`DispatchArtifacts`] and
//! released in a fixed order when the dispatch ends, whichever stage it
//! reached. Nothing is cached between dispatches.

use crate::bridge::await_completion;
use crate::driver::{BufferRole, BufferSpec, ComputeDriver, ErrorFilter};
use crate::error_sink::ErrorScope;
use crate::session::DispatchContext;
use crate::{layout, ComputeError};

#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub kernel_source: &'a str,
    pub input: &'a [i32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Idle,
    Compiling,
    CompileFailed,
    Compiled,
    Allocating,
    Binding,
    Encoding,
    Submitted,
    Mapping,
    MapFailed,
    Complete,
    Released,
}

/// Stages a dispatch went through and how many artifacts it created and released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub trace: Vec<DispatchStage>,
    pub artifacts_created: usize,
    pub artifacts_released: usize,
}

impl DispatchReport {
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.artifacts_created == self.artifacts_released
    }

    #[must_use]
    pub fn reached(&self, stage: DispatchStage) -> bool {
        self.trace.contains(&stage)
    }

    /// Last stage before release.
    #[must_use]
    pub fn final_stage(&self) -> DispatchStage {
        self.trace
            .iter()
            .rev()
            .copied()
            .find(|s| *s != DispatchStage::Released)
            .unwrap_or(DispatchStage::Idle)
    }
}

struct DispatchArtifacts<D: ComputeDriver> {
    module: Option<D::ShaderModule>,
    storage: Option<D::Buffer>,
    staging: Option<D::Buffer>,
    pipeline: Option<D::ComputePipeline>,
    layout: Option<D::BindGroupLayout>,
    bind_group: Option<D::BindGroup>,
    encoder: Option<D::CommandEncoder>,
    commands: Option<D::CommandBuffer>,
    created: usize,
    released: usize,
}

fn tally<T>(created: &mut usize, handle: Option<T>) -> Option<T> {
    *created += usize::from(handle.is_some());
    handle
}

fn release_slot<T>(slot: &mut Option<T>, released: &mut usize) {
    if let Some(handle) = slot.take() {
        drop(handle);
        *released += 1;
    }
}

impl<D: ComputeDriver> DispatchArtifacts<D> {
    fn new() -> Self {
        Self {
            module: None,
            storage: None,
            staging: None,
            pipeline: None,
            layout: None,
            bind_group: None,
            encoder: None,
            commands: None,
            created: 0,
            released: 0,
        }
    }

    fn release(&mut self) {
        let released = &mut self.released;
        release_slot(&mut self.commands, released);
        release_slot(&mut self.encoder, released);
        release_slot(&mut self.bind_group, released);
        release_slot(&mut self.layout, released);
        release_slot(&mut self.pipeline, released);
        release_slot(&mut self.storage, released);
        release_slot(&mut self.staging, released);
        release_slot(&mut self.module, released);
    }
}

impl<D: ComputeDriver> Drop for DispatchArtifacts<D> {
    fn drop(&mut self) {
        self.release();
    }
}

struct DispatchRun<'c, 's, D: ComputeDriver> {
    ctx: &'c DispatchContext<'s, D>,
    artifacts: DispatchArtifacts<D>,
    trace: Vec<DispatchStage>,
}

/// Runs one dispatch to completion and releases everything it created.
pub fn execute<D: ComputeDriver>(
    ctx: &DispatchContext<'_, D>,
    request: &DispatchRequest<'_>,
) -> (Result<Vec<i32>, ComputeError>, DispatchReport) {
    let mut run = DispatchRun { ctx, artifacts: DispatchArtifacts::new(), trace: vec![DispatchStage::Idle] };
    let result = run.run(request);
    (result, run.finish())
}

impl<D: ComputeDriver> DispatchRun<'_, '_, D> {
    fn advance(&mut self, stage: DispatchStage) {
        tracing::debug!(?stage, "dispatch stage");
        self.trace.push(stage);
    }

    fn finish(mut self) -> DispatchReport {
        self.artifacts.release();
        self.advance(DispatchStage::Released);
        DispatchReport {
            trace: std::mem::take(&mut self.trace),
            artifacts_created: self.artifacts.created,
            artifacts_released: self.artifacts.released,
        }
    }

    fn run(&mut self, request: &DispatchRequest<'_>) -> Result<Vec<i32>, ComputeError> {
        self.ctx.errors.reset();

        let elements = request.input.len();
        let bytes = layout::byte_size(elements);
        let limit = self.ctx.limits.max_dispatch_bytes();
        let workgroups = layout::workgroups_for(elements)
            .filter(|_| bytes <= limit)
            .ok_or(ComputeError::InputTooLarge { bytes, limit })?;
        if !self.ctx.limits.admits_workgroups(workgroups) {
            return Err(ComputeError::TooManyWorkgroups {
                elements,
                limit: self.ctx.limits.max_compute_workgroups_per_dimension,
            });
        }

        self.compile(request.kernel_source)?;
        self.allocate(bytes)?;
        self.bind()?;
        self.encode(workgroups, bytes)?;
        self.submit(request.input)?;
        self.read_back(bytes, elements)
    }

    fn compile(&mut self, source: &str) -> Result<(), ComputeError> {
        let ctx = self.ctx;
        self.advance(DispatchStage::Compiling);

        let scope = ErrorScope::push(ctx.driver, ctx.device, ErrorFilter::Validation);
        let module = ctx.driver.create_shader_module(ctx.device, "dispatch kernel", source);
        self.artifacts.module = tally(&mut self.artifacts.created, module);

        let failure = match scope.finish(ctx.errors, &ctx.bridge) {
            Err(e) => Some(e),
            Ok(outcome) => match (outcome.into_error(), self.artifacts.module.is_some()) {
                (Some(error), _) => Some(ComputeError::Compilation { message: error.message }),
                (None, false) => {
                    tracing::warn!("driver returned no shader module and reported no error");
                    Some(ComputeError::ModuleMissing)
                }
                (None, true) => None,
            },
        };
        if let Some(error) = failure {
            release_slot(&mut self.artifacts.module, &mut self.artifacts.released);
            ctx.errors.reset();
            self.advance(DispatchStage::CompileFailed);
            return Err(error);
        }
        self.advance(DispatchStage::Compiled);
        Ok(())
    }

    fn allocate(&mut self, bytes: u64) -> Result<(), ComputeError> {
        let ctx = self.ctx;
        self.advance(DispatchStage::Allocating);
        let artifacts = &mut self.artifacts;

        let scope = ErrorScope::push(ctx.driver, ctx.device, ErrorFilter::OutOfMemory);
        let storage =
            ctx.driver.create_buffer(ctx.device, &BufferSpec { label: "storage", size: bytes, role: BufferRole::Storage });
        artifacts.storage = tally(&mut artifacts.created, storage);
        let staging =
            ctx.driver.create_buffer(ctx.device, &BufferSpec { label: "staging", size: bytes, role: BufferRole::Staging });
        artifacts.staging = tally(&mut artifacts.created, staging);

        if let Some(error) = scope.finish(ctx.errors, &ctx.bridge)?.into_error() {
            return Err(ComputeError::BufferCreation(error.to_string()));
        }
        if artifacts.storage.is_none() {
            return Err(ComputeError::BufferCreation("storage buffer was not created".to_owned()));
        }
        if artifacts.staging.is_none() {
            return Err(ComputeError::BufferCreation("staging buffer was not created".to_owned()));
        }
        Ok(())
    }

    fn bind(&mut self) -> Result<(), ComputeError> {
        let ctx = self.ctx;
        self.advance(DispatchStage::Binding);
        let artifacts = &mut self.artifacts;
        let (Some(module), Some(storage)) = (&artifacts.module, &artifacts.storage) else {
            return Err(ComputeError::Binding("module or storage buffer missing".to_owned()));
        };

        let scope = ErrorScope::push(ctx.driver, ctx.device, ErrorFilter::Validation);
        let pipeline = ctx.driver.create_compute_pipeline(ctx.device, "dispatch pipeline", module, ctx.entry_point);
        artifacts.pipeline = tally(&mut artifacts.created, pipeline);
        let layout = artifacts.pipeline.as_ref().and_then(|p| ctx.driver.bind_group_layout(p, layout::BIND_GROUP));
        artifacts.layout = tally(&mut artifacts.created, layout);
        let bind_group = artifacts.layout.as_ref().and_then(|l| {
            ctx.driver.create_bind_group(ctx.device, "dispatch bind group", l, layout::STORAGE_IO, storage)
        });
        artifacts.bind_group = tally(&mut artifacts.created, bind_group);

        if let Some(error) = scope.finish(ctx.errors, &ctx.bridge)?.into_error() {
            return Err(ComputeError::Binding(error.message));
        }
        if artifacts.bind_group.is_none() {
            return Err(ComputeError::Binding("pipeline, layout or bind group was not created".to_owned()));
        }
        Ok(())
    }

    fn encode(&mut self, workgroups: [u32; 3], bytes: u64) -> Result<(), ComputeError> {
        let ctx = self.ctx;
        self.advance(DispatchStage::Encoding);
        let artifacts = &mut self.artifacts;
        let (Some(pipeline), Some(bind_group), Some(storage), Some(staging)) =
            (&artifacts.pipeline, &artifacts.bind_group, &artifacts.storage, &artifacts.staging)
        else {
            return Err(ComputeError::Encoding("binding artifacts missing"));
        };

        let encoder = ctx.driver.create_command_encoder(ctx.device, "dispatch encoder");
        artifacts.encoder = tally(&mut artifacts.created, encoder);
        let encoder = artifacts.encoder.as_mut().ok_or(ComputeError::Encoding("command encoder was not created"))?;

        // The pass begins and ends inside encode_compute_pass.
        artifacts.created += 1;
        ctx.driver.encode_compute_pass(encoder, pipeline, bind_group, workgroups);
        artifacts.released += 1;
        ctx.driver.copy_buffer_to_buffer(encoder, storage, staging, bytes);

        let finished = artifacts.encoder.take().and_then(|encoder| {
            artifacts.released += 1;
            ctx.driver.finish(encoder)
        });
        artifacts.commands = tally(&mut artifacts.created, finished);
        if artifacts.commands.is_none() {
            return Err(ComputeError::Encoding("encoder produced no command buffer"));
        }
        Ok(())
    }

    fn submit(&mut self, input: &[i32]) -> Result<(), ComputeError> {
        let ctx = self.ctx;
        self.advance(DispatchStage::Submitted);
        let artifacts = &mut self.artifacts;
        let Some(storage) = &artifacts.storage else {
            return Err(ComputeError::Encoding("storage buffer missing"));
        };
        let Some(commands) = artifacts.commands.take() else {
            return Err(ComputeError::Encoding("nothing to submit"));
        };

        ctx.driver.write_buffer(ctx.queue, storage, bytemuck::cast_slice(input));
        ctx.driver.submit(ctx.queue, commands);
        artifacts.released += 1;
        Ok(())
    }

    fn read_back(&mut self, bytes: u64, elements: usize) -> Result<Vec<i32>, ComputeError> {
        let ctx = self.ctx;
        self.advance(DispatchStage::Mapping);
        let result = match &self.artifacts.staging {
            Some(staging) => map_and_read(ctx, staging, bytes, elements),
            None => Err(ComputeError::Map("staging buffer missing".to_owned())),
        };
        self.advance(if result.is_ok() { DispatchStage::Complete } else { DispatchStage::MapFailed });
        result
    }
}

fn map_and_read<D: ComputeDriver>(
    ctx: &DispatchContext<'_, D>,
    staging: &D::Buffer,
    bytes: u64,
    elements: usize,
) -> Result<Vec<i32>, ComputeError> {
    let (driver, device) = (ctx.driver, ctx.device);
    await_completion(
        "buffer map",
        &ctx.bridge,
        |token| driver.map_read(staging, bytes, Box::new(move |r| token.complete(r))),
        || driver.poll(device),
    )?
    .map_err(ComputeError::Map)?;

    let mapped = driver.read_mapped(staging, bytes);
    driver.unmap(staging);
    let mapped = mapped.ok_or_else(|| ComputeError::Map("mapped range unavailable".to_owned()))?;

    if let Some(error) = ctx.errors.take() {
        return Err(ComputeError::Map(format!("driver reported an error during execution: {error}")));
    }
    let output: Vec<i32> = bytemuck::pod_collect_to_vec(&mapped);
    if output.len() != elements {
        return Err(ComputeError::Map(format!("read {} elements, expected {elements}", output.len())));
    }
    Ok(output)
}
