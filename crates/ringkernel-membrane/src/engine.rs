//! GPU-resident membrane engine.
//!
//! The engine owns one compute device, the device mirrors of the loaded
//! model and the compiled physics kernel. Audio is produced one block at a
//! time: [`Engine::fill_block`] uploads the block's excitation, dispatches
//! the kernel once per sample and reads the rendered samples back.
//!
//! ```text
//! Uninitialized -> DeviceReady -> ModelLoaded -> KernelBuilt -> Ready
//! ```
//!
//! Every blocking wait is bounded by [`EngineConfig::device_timeout`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::buffer::StreamingBuffer;
use crate::config::EngineConfig;
use crate::description::ModelDescription;
use crate::device::{DeviceBuffer, DevicePreference, GpuContext};
use crate::error::{EngineError, Result};
use crate::grid::Grid;
use crate::kernel::{
    self, CoefficientRegistry, FixedSlot, KernelLayout, FIRST_COEFFICIENT_SLOT,
    SCALAR_UNIFORM_SIZE,
};
use crate::model::{GenerationRole, Model};
use crate::stats::BlockStats;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineState {
    /// No device.
    Uninitialized,
    /// Device and queue open.
    DeviceReady,
    /// Model buffers allocated.
    ModelLoaded,
    /// Kernel compiled and bound.
    KernelBuilt,
    /// Ready for block processing.
    Ready,
}

/// Read-only view of the current pressure field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSnapshot<'a> {
    /// Field width in cells.
    pub width: u32,
    /// Field height in cells.
    pub height: u32,
    /// Current generation, row-major.
    pub pressure: &'a [f32],
    /// Boundary gain, row-major.
    pub boundary: &'a [f32],
}

impl FieldSnapshot<'_> {
    /// Pressure at `(x, y)`.
    pub fn pressure_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pressure
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Sum of squared pressures.
    pub fn energy(&self) -> f32 {
        self.pressure.iter().map(|p| p * p).sum()
    }

    /// Largest absolute pressure.
    pub fn peak(&self) -> f32 {
        self.pressure.iter().fold(0.0f32, |acc, p| acc.max(p.abs()))
    }
}

/// Consumer of field snapshots, such as a visual preview.
pub trait FieldRenderer {
    /// Draw one snapshot.
    fn render(&mut self, snapshot: &FieldSnapshot<'_>);
}

impl<F> FieldRenderer for F
where
    F: FnMut(&FieldSnapshot<'_>),
{
    fn render(&mut self, snapshot: &FieldSnapshot<'_>) {
        self(snapshot)
    }
}

/// Device mirrors of a loaded model plus the host staging buffers.
struct DeviceModel {
    model: Model,
    region_ids: DeviceBuffer,
    generations: DeviceBuffer,
    boundary: DeviceBuffer,
    rotation_index: DeviceBuffer,
    sample_offset: DeviceBuffer,
    excitation: DeviceBuffer,
    output: DeviceBuffer,
    input_position: DeviceBuffer,
    output_mask: DeviceBuffer,
    output_staging: DeviceBuffer,
    field_staging: DeviceBuffer,
    excitation_host: StreamingBuffer<f32>,
    output_host: StreamingBuffer<f32>,
    zero_block: Vec<f32>,
}

fn scalar_uniform<T: bytemuck::Pod>(
    device: &wgpu::Device,
    value: T,
    label: &str,
) -> DeviceBuffer {
    let mut bytes = [0u8; SCALAR_UNIFORM_SIZE as usize];
    let value_bytes = bytemuck::bytes_of(&value);
    bytes[..value_bytes.len()].copy_from_slice(value_bytes);
    DeviceBuffer::with_contents(
        device,
        &bytes,
        wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        label,
    )
}

impl DeviceModel {
    fn allocate(gpu: &GpuContext, model: Model, ids: &Grid<i32>, capacity: usize) -> Result<Self> {
        let device = gpu.device();
        let cells = model.cell_count();
        let capacity = capacity.max(1);

        let generation_bytes = (3 * cells * std::mem::size_of::<f32>()) as u64;
        let limits = device.limits();
        let max_binding = limits.max_storage_buffer_binding_size as u64;
        if generation_bytes > max_binding || generation_bytes > limits.max_buffer_size {
            return Err(EngineError::model(format!(
                "{}x{} model needs {} bytes of generation storage, device allows {}",
                model.width(),
                model.height(),
                generation_bytes,
                max_binding.min(limits.max_buffer_size)
            )));
        }

        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let readable = storage | wgpu::BufferUsages::COPY_SRC;
        let staging = wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST;

        let mask = model.output_mask();

        let region_ids = DeviceBuffer::with_contents(
            device,
            bytemuck::cast_slice(ids.as_slice()),
            storage,
            "Region Ids",
        );
        let generations = DeviceBuffer::with_contents(
            device,
            bytemuck::cast_slice(&vec![0.0f32; 3 * cells]),
            readable,
            "Generations",
        );
        let boundary = DeviceBuffer::with_contents(
            device,
            bytemuck::cast_slice(model.boundary().as_slice()),
            storage,
            "Boundary Gain",
        );
        let excitation = DeviceBuffer::with_contents(
            device,
            bytemuck::cast_slice(&vec![0.0f32; capacity]),
            storage,
            "Excitation",
        );
        let output = DeviceBuffer::with_contents(
            device,
            bytemuck::cast_slice(&vec![0.0f32; capacity]),
            readable,
            "Output",
        );
        let output_mask =
            DeviceBuffer::with_contents(device, bytemuck::cast_slice(&mask), storage, "Output Mask");

        let rotation_index = scalar_uniform(device, model.rotation(), "Rotation Index");
        let sample_offset = scalar_uniform(device, 0u32, "Sample Offset");
        let input_position =
            scalar_uniform(device, model.input_position() as u32, "Input Position");

        let output_staging = DeviceBuffer::new(
            device,
            (capacity * std::mem::size_of::<f32>()) as u64,
            staging,
            "Output Staging",
        );
        let field_staging = DeviceBuffer::new(
            device,
            (cells * std::mem::size_of::<f32>()) as u64,
            staging,
            "Field Staging",
        );

        Ok(Self {
            model,
            region_ids,
            generations,
            boundary,
            rotation_index,
            sample_offset,
            excitation,
            output,
            input_position,
            output_mask,
            output_staging,
            field_staging,
            excitation_host: StreamingBuffer::new(capacity),
            output_host: StreamingBuffer::new(capacity),
            zero_block: vec![0.0; capacity],
        })
    }

    fn fixed_buffer(&self, slot: FixedSlot) -> &DeviceBuffer {
        match slot {
            FixedSlot::RegionIds => &self.region_ids,
            FixedSlot::Generations => &self.generations,
            FixedSlot::BoundaryGain => &self.boundary,
            FixedSlot::RotationIndex => &self.rotation_index,
            FixedSlot::SampleOffset => &self.sample_offset,
            FixedSlot::Excitation => &self.excitation,
            FixedSlot::Output => &self.output,
            FixedSlot::InputPosition => &self.input_position,
            FixedSlot::OutputMask => &self.output_mask,
        }
    }

    /// Rewrite the whole listener mask from the host model.
    fn upload_output_mask(&self, gpu: &GpuContext) {
        gpu.queue().write_buffer(
            self.output_mask.buffer(),
            0,
            bytemuck::cast_slice(&self.model.output_mask()),
        );
        gpu.flush();
    }

    fn reset_cursors(&mut self) {
        self.excitation_host.reset_index();
        self.output_host.reset_index();
    }

    /// Queue zero writes over the first `samples` output slots and the whole
    /// excitation buffer.
    fn clear_block(&self, gpu: &GpuContext, samples: usize) {
        let queue = gpu.queue();
        let samples = samples.min(self.zero_block.len());
        if samples > 0 {
            queue.write_buffer(
                self.output.buffer(),
                0,
                bytemuck::cast_slice(&self.zero_block[..samples]),
            );
        }
        queue.write_buffer(
            self.excitation.buffer(),
            0,
            bytemuck::cast_slice(&self.zero_block),
        );
    }
}

/// Compiled kernel and its bindings.
struct KernelPipeline {
    layout: KernelLayout,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    coefficient_buffers: BTreeMap<u32, DeviceBuffer>,
    coefficient_values: BTreeMap<u32, f32>,
    workgroups: (u32, u32),
}

impl KernelPipeline {
    async fn build(
        gpu: &GpuContext,
        dm: &DeviceModel,
        source: &str,
        entry_point: &str,
    ) -> Result<Self> {
        let width = dm.model.width();
        let height = dm.model.height();
        let full_source = kernel::assemble_source(width, height, source);
        let layout = kernel::reflect(&full_source, entry_point)?;

        let device = gpu.device();
        let coefficient_buffers: BTreeMap<u32, DeviceBuffer> = layout
            .coefficients
            .iter()
            .map(|(name, slot)| (slot, scalar_uniform(device, 0.0f32, name)))
            .collect();

        let mut buffers = Vec::with_capacity(layout.bindings.len());
        for binding in &layout.bindings {
            let buffer = match FixedSlot::from_slot(binding.slot) {
                Some(fixed) => dm.fixed_buffer(fixed),
                None => coefficient_buffers
                    .get(&binding.slot)
                    .ok_or(EngineError::UnknownSlot(binding.slot))?,
            };
            buffers.push((binding.slot, buffer));
        }

        // No early returns until the scope is popped.
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Membrane Kernel"),
            source: wgpu::ShaderSource::Wgsl(full_source.as_str().into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Membrane Bind Group Layout"),
            entries: &layout.layout_entries(),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Membrane Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Membrane Pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: &layout.entry_point,
        });

        let entries: Vec<wgpu::BindGroupEntry<'_>> = buffers
            .iter()
            .map(|(slot, buffer)| wgpu::BindGroupEntry {
                binding: *slot,
                resource: buffer.buffer().as_entire_binding(),
            })
            .collect();

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Membrane Bind Group"),
            layout: &bind_group_layout,
            entries: &entries,
        });

        if let Some(err) = device.pop_error_scope().await {
            return Err(EngineError::kernel(err.to_string()));
        }

        let coefficient_values = coefficient_buffers.keys().map(|&slot| (slot, 0.0)).collect();
        let workgroups = layout.dispatch_size(width, height);

        Ok(Self {
            layout,
            pipeline,
            bind_group,
            coefficient_buffers,
            coefficient_values,
            workgroups,
        })
    }
}

/// FDTD membrane engine.
pub struct Engine {
    config: EngineConfig,
    state: EngineState,
    gpu: Option<GpuContext>,
    model: Option<DeviceModel>,
    kernel: Option<KernelPipeline>,
    stats: BlockStats,
}

impl Engine {
    /// Create an engine without a device.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: EngineState::Uninitialized,
            gpu: None,
            model: None,
            kernel: None,
            stats: BlockStats::default(),
        }
    }

    /// Create an engine and open a device using the configured preference.
    pub async fn initialize(config: EngineConfig) -> Result<Self> {
        let preference = config.device_preference.clone();
        let mut engine = Self::new(config);
        engine.init_device(&preference).await?;
        Ok(engine)
    }

    /// Blocking [`initialize`](Self::initialize) for callers without an
    /// async runtime.
    pub fn initialize_blocking(config: EngineConfig) -> Result<Self> {
        pollster::block_on(Self::initialize(config))
    }

    /// Blocking [`compile_kernel`](Self::compile_kernel).
    pub fn compile_kernel_blocking(&mut self, source: &str) -> Result<()> {
        pollster::block_on(self.compile_kernel(source))
    }

    fn transition(&mut self, next: EngineState) {
        debug!("Engine state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn require(&self, expected: EngineState) -> Result<()> {
        if self.state < expected {
            return Err(EngineError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn model_parts(&mut self) -> Result<(&GpuContext, &mut DeviceModel)> {
        let actual = self.state;
        match (&self.gpu, &mut self.model) {
            (Some(gpu), Some(dm)) if actual >= EngineState::ModelLoaded => Ok((gpu, dm)),
            _ => Err(EngineError::InvalidState {
                expected: EngineState::ModelLoaded,
                actual,
            }),
        }
    }

    fn ready_parts(&mut self) -> Result<(&GpuContext, &mut DeviceModel, &mut KernelPipeline)> {
        let actual = self.state;
        match (&self.gpu, &mut self.model, &mut self.kernel) {
            (Some(gpu), Some(dm), Some(kernel)) if actual == EngineState::Ready => {
                Ok((gpu, dm, kernel))
            }
            _ => Err(EngineError::InvalidState {
                expected: EngineState::Ready,
                actual,
            }),
        }
    }

    /// Open the first adapter matching `preference`.
    pub async fn init_device(&mut self, preference: &DevicePreference) -> Result<()> {
        if self.state != EngineState::Uninitialized {
            return Err(EngineError::InvalidState {
                expected: EngineState::Uninitialized,
                actual: self.state,
            });
        }

        let gpu = GpuContext::new(preference, self.config.device_timeout()).await?;
        self.gpu = Some(gpu);
        self.transition(EngineState::DeviceReady);
        Ok(())
    }

    /// Build a model from a region grid and allocate its device buffers.
    ///
    /// Any previously loaded model and kernel are released.
    pub fn load_model(
        &mut self,
        ids: &Grid<i32>,
        boundary_gain: f32,
        input: (u32, u32),
        output: (u32, u32),
    ) -> Result<()> {
        self.require(EngineState::DeviceReady)?;
        if ids.is_empty() {
            return Err(EngineError::model("region grid is empty"));
        }

        let mut model = Model::from_region_grid(ids, boundary_gain);
        model.set_input_position(input.0, input.1)?;
        model.set_output_position(output.0, output.1)?;

        self.kernel = None;
        self.model = None;
        self.transition(EngineState::DeviceReady);

        let gpu = self
            .gpu
            .as_ref()
            .ok_or(EngineError::InvalidState {
                expected: EngineState::DeviceReady,
                actual: EngineState::Uninitialized,
            })?;
        let dm = DeviceModel::allocate(gpu, model, ids, self.config.block_capacity)?;

        info!(
            "Loaded {}x{} model (input {:?}, output {:?}, boundary gain {})",
            ids.width(),
            ids.height(),
            input,
            output,
            boundary_gain
        );

        self.model = Some(dm);
        self.transition(EngineState::ModelLoaded);
        Ok(())
    }

    /// Parse a model description file and load its region grid.
    ///
    /// Returns the description so the caller can compile its kernel.
    pub fn load_model_file(
        &mut self,
        path: impl AsRef<Path>,
        boundary_gain: f32,
        input: (u32, u32),
        output: (u32, u32),
    ) -> Result<ModelDescription> {
        let description = ModelDescription::from_file(path)?;
        let ids = description.region_grid()?;
        self.load_model(&ids, boundary_gain, input, output)?;
        Ok(description)
    }

    /// Compile a WGSL physics kernel against the loaded model and bind it.
    ///
    /// On failure the engine stays in `ModelLoaded` without a kernel.
    pub async fn compile_kernel(&mut self, source: &str) -> Result<()> {
        self.require(EngineState::ModelLoaded)?;
        self.kernel = None;
        self.transition(EngineState::ModelLoaded);

        let entry_point = self.config.entry_point.clone();
        let pipeline = {
            let (gpu, dm) = self.model_parts()?;
            KernelPipeline::build(gpu, dm, source, &entry_point).await?
        };

        info!(
            "Compiled kernel '{}' (workgroup {:?}, {} coefficients)",
            pipeline.layout.entry_point,
            pipeline.layout.workgroup_size,
            pipeline.layout.coefficients.len()
        );

        self.kernel = Some(pipeline);
        self.transition(EngineState::KernelBuilt);
        self.transition(EngineState::Ready);
        Ok(())
    }

    /// Load a description, compile its kernel and apply its default
    /// coefficients.
    pub async fn create_model_from_description(
        &mut self,
        description: &ModelDescription,
        boundary_gain: f32,
        input: (u32, u32),
        output: (u32, u32),
    ) -> Result<()> {
        let ids = description.region_grid()?;
        self.load_model(&ids, boundary_gain, input, output)?;

        let controller = description.controller()?;
        self.compile_kernel(&controller.physics_kernel).await?;
        for (name, value) in &controller.coefficients {
            self.update_coefficient(name, *value)?;
        }
        Ok(())
    }

    /// Load a model file, compile its kernel and apply its default
    /// coefficients.
    pub async fn create_model(
        &mut self,
        path: impl AsRef<Path>,
        boundary_gain: f32,
        input: (u32, u32),
        output: (u32, u32),
    ) -> Result<()> {
        let description = ModelDescription::from_file(path)?;
        self.create_model_from_description(&description, boundary_gain, input, output)
            .await
    }

    /// Upload a block's excitation and rewind both block cursors.
    pub fn begin_block(&mut self, excitation: &[f32]) -> Result<()> {
        let (gpu, dm, _) = self.ready_parts()?;
        let capacity = dm.excitation_host.capacity();
        if excitation.len() > capacity {
            return Err(EngineError::BlockTooLarge {
                requested: excitation.len(),
                capacity,
            });
        }

        dm.reset_cursors();
        dm.excitation_host.fill(0.0);
        dm.excitation_host.load(excitation);
        gpu.queue().write_buffer(
            dm.excitation.buffer(),
            0,
            bytemuck::cast_slice(dm.excitation_host.as_slice()),
        );
        Ok(())
    }

    /// Advance the simulation by one sample.
    ///
    /// Dispatches the kernel once with the current rotation index and block
    /// offset, then advances the block cursors and the rotation.
    pub fn step(&mut self) -> Result<()> {
        let (gpu, dm, kernel) = self.ready_parts()?;

        let capacity = dm.output_host.capacity();
        let offset = dm.output_host.index() as u32;
        if dm.output_host.next().is_none() {
            return Err(EngineError::BlockOverrun { capacity });
        }
        if let Some(slot) = dm.excitation_host.next() {
            *slot = 0.0;
        }

        let rotation = dm.model.rotation();
        let queue = gpu.queue();
        queue.write_buffer(dm.rotation_index.buffer(), 0, bytemuck::bytes_of(&rotation));
        queue.write_buffer(dm.sample_offset.buffer(), 0, bytemuck::bytes_of(&offset));

        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Membrane Step Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Membrane Step"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &kernel.bind_group, &[]);
            pass.dispatch_workgroups(kernel.workgroups.0, kernel.workgroups.1, 1);
        }
        queue.submit(std::iter::once(encoder.finish()));

        dm.model.rotate_generations();
        Ok(())
    }

    /// Read back the first `output.len()` samples of the block, clear the
    /// device output and excitation regions and rewind the cursors.
    pub fn finish_block(&mut self, output: &mut [f32]) -> Result<()> {
        let (gpu, dm, _) = self.ready_parts()?;
        let capacity = dm.output_host.capacity();
        let samples = output.len();
        if samples > capacity {
            return Err(EngineError::BlockTooLarge {
                requested: samples,
                capacity,
            });
        }

        dm.reset_cursors();
        let read = gpu.read_buffer(
            &dm.output,
            0,
            &dm.output_staging,
            &mut dm.output_host.as_mut_slice()[..samples],
        );
        dm.clear_block(gpu, samples);
        gpu.flush();

        read?;
        gpu.check_errors()?;
        output.copy_from_slice(&dm.output_host.as_slice()[..samples]);
        Ok(())
    }

    /// Render one block.
    ///
    /// `excitation` and `output` must have the same length, at most the
    /// block capacity. Both block cursors are 0 when this returns, whether
    /// or not it succeeded.
    pub fn fill_block(&mut self, excitation: &[f32], output: &mut [f32]) -> Result<()> {
        self.require(EngineState::Ready)?;
        if excitation.len() != output.len() {
            return Err(EngineError::BlockLengthMismatch {
                excitation: excitation.len(),
                output: output.len(),
            });
        }

        let started = Instant::now();
        let result = self.run_block(excitation, output);

        if let Ok((gpu, dm)) = self.model_parts() {
            dm.reset_cursors();
            if result.is_err() {
                dm.clear_block(gpu, dm.zero_block.len());
                gpu.flush();
            }
        }

        match &result {
            Ok(()) => {
                let elapsed = started.elapsed();
                let budget = self.config.block_budget(output.len());
                if self.stats.record(output.len(), elapsed, budget) {
                    warn!(
                        "Block of {} samples took {:?}, budget {:?}",
                        output.len(),
                        elapsed,
                        budget
                    );
                }
            }
            Err(e) => {
                self.stats.record_failure();
                warn!("Block failed: {}", e);
            }
        }

        result
    }

    fn run_block(&mut self, excitation: &[f32], output: &mut [f32]) -> Result<()> {
        self.begin_block(excitation)?;
        for _ in 0..excitation.len() {
            self.step()?;
        }
        self.finish_block(output)
    }

    /// Set a coefficient by name. Takes effect on the next step.
    pub fn update_coefficient(&mut self, name: &str, value: f32) -> Result<()> {
        let (_, _, kernel) = self.ready_parts()?;
        let slot = kernel
            .layout
            .coefficients
            .slot(name)
            .ok_or_else(|| EngineError::UnknownCoefficient(name.to_string()))?;
        self.update_coefficient_at(slot, value)
    }

    /// Set a coefficient by slot. Takes effect on the next step.
    pub fn update_coefficient_at(&mut self, slot: u32, value: f32) -> Result<()> {
        let (gpu, _, kernel) = self.ready_parts()?;
        if slot < FIRST_COEFFICIENT_SLOT {
            return Err(EngineError::ReservedSlot(slot));
        }
        let buffer = kernel
            .coefficient_buffers
            .get(&slot)
            .ok_or(EngineError::UnknownSlot(slot))?;

        gpu.queue()
            .write_buffer(buffer.buffer(), 0, bytemuck::bytes_of(&value));
        kernel.coefficient_values.insert(slot, value);
        debug!("Coefficient at slot {} set to {}", slot, value);
        Ok(())
    }

    /// Move the excitation cell.
    pub fn set_input_position(&mut self, x: u32, y: u32) -> Result<()> {
        let (gpu, dm) = self.model_parts()?;
        dm.model.set_input_position(x, y)?;
        let position = dm.model.input_position() as u32;
        gpu.queue()
            .write_buffer(dm.input_position.buffer(), 0, bytemuck::bytes_of(&position));
        gpu.flush();
        Ok(())
    }

    /// Replace every listener with a single cell.
    pub fn set_output_position(&mut self, x: u32, y: u32) -> Result<()> {
        let (gpu, dm) = self.model_parts()?;
        dm.model.set_output_position(x, y)?;
        dm.upload_output_mask(gpu);
        Ok(())
    }

    /// Add a listener cell. Every listener's value is summed into the output.
    pub fn add_output_position(&mut self, x: u32, y: u32) -> Result<()> {
        let (gpu, dm) = self.model_parts()?;
        dm.model.add_output_position(x, y)?;
        dm.upload_output_mask(gpu);
        debug!("Listeners: {:?}", dm.model.output_positions());
        Ok(())
    }

    /// Replace every listener with `positions`. Nothing changes if any
    /// position is out of range or the list is empty.
    pub fn set_output_positions(&mut self, positions: &[(u32, u32)]) -> Result<()> {
        let (gpu, dm) = self.model_parts()?;
        dm.model.set_output_positions(positions)?;
        dm.upload_output_mask(gpu);
        debug!("Listeners: {:?}", dm.model.output_positions());
        Ok(())
    }

    /// Read the current generation back to the host model.
    pub fn render_snapshot(&mut self) -> Result<FieldSnapshot<'_>> {
        let (gpu, dm, _) = self.ready_parts()?;
        let cells = dm.model.cell_count();
        let current = dm.model.generation_index(GenerationRole::Current);
        let offset = (current * cells * std::mem::size_of::<f32>()) as u64;

        gpu.read_buffer(
            &dm.generations,
            offset,
            &dm.field_staging,
            dm.model.current_mut().as_mut_slice(),
        )?;

        let model = &dm.model;
        Ok(FieldSnapshot {
            width: model.width(),
            height: model.height(),
            pressure: model.current().as_slice(),
            boundary: model.boundary().as_slice(),
        })
    }

    /// Hand a fresh snapshot to `renderer`.
    pub fn render_simulation(&mut self, renderer: &mut dyn FieldRenderer) -> Result<()> {
        let snapshot = self.render_snapshot()?;
        renderer.render(&snapshot);
        Ok(())
    }

    /// Zero all generations on host and device without reloading the model.
    pub fn reset_field(&mut self) -> Result<()> {
        let (gpu, dm) = self.model_parts()?;
        let zeros = vec![0.0f32; 3 * dm.model.cell_count()];
        gpu.queue()
            .write_buffer(dm.generations.buffer(), 0, bytemuck::cast_slice(&zeros));
        dm.clear_block(gpu, dm.zero_block.len());
        gpu.flush();
        dm.model.reset();
        dm.reset_cursors();
        debug!("Field reset");
        Ok(())
    }

    /// Lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loaded model width, 0 without a model.
    pub fn model_width(&self) -> u32 {
        self.model.as_ref().map_or(0, |dm| dm.model.width())
    }

    /// Loaded model height, 0 without a model.
    pub fn model_height(&self) -> u32 {
        self.model.as_ref().map_or(0, |dm| dm.model.height())
    }

    /// Host model mirror.
    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref().map(|dm| &dm.model)
    }

    /// Generation rotation index in `0..3`.
    pub fn rotation_index(&self) -> u32 {
        self.model.as_ref().map_or(0, |dm| dm.model.rotation())
    }

    /// Output cursor within the current block.
    pub fn sample_cursor(&self) -> usize {
        self.model.as_ref().map_or(0, |dm| dm.output_host.index())
    }

    /// Excitation cursor within the current block.
    pub fn excitation_cursor(&self) -> usize {
        self.model.as_ref().map_or(0, |dm| dm.excitation_host.index())
    }

    /// Largest block `fill_block` accepts.
    pub fn block_capacity(&self) -> usize {
        self.model
            .as_ref()
            .map_or(self.config.block_capacity.max(1), |dm| dm.output_host.capacity())
    }

    /// Coefficients declared by the compiled kernel.
    pub fn coefficients(&self) -> Option<&CoefficientRegistry> {
        self.kernel.as_ref().map(|k| &k.layout.coefficients)
    }

    /// Last value written to the coefficient called `name`.
    pub fn coefficient(&self, name: &str) -> Option<f32> {
        let kernel = self.kernel.as_ref()?;
        let slot = kernel.layout.coefficients.slot(name)?;
        kernel.coefficient_values.get(&slot).copied()
    }

    /// Reflected interface of the compiled kernel.
    pub fn kernel_layout(&self) -> Option<&KernelLayout> {
        self.kernel.as_ref().map(|k| &k.layout)
    }

    /// Info about the open adapter.
    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        self.gpu.as_ref().map(GpuContext::info)
    }

    /// Block timing.
    pub fn stats(&self) -> &BlockStats {
        &self.stats
    }
}
