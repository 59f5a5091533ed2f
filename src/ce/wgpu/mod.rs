//! GPU backend using WGPU + WGSL compute shaders.
//!
//! The provider selects an adapter, creates a device and queue, and builds
//! one program out of its [`KernelSources`]. Four entry points are looked
//! up in that program:
//!
//! - `compute`: `dst = src × W`
//! - `compute_with_bias`: `dst = src × W + m · b`
//! - `exp_sum`: layer-wide `Σ e^x` into a scratch slot
//! - `activate`: element-wise activation, switched on the activation code
//!
//! All four share one bind-group layout. Per-dispatch parameters live in a
//! uniform buffer addressed by dynamic offset, so a whole batch is encoded
//! into a single compute pass.
//!
//! Host ↔ device copies follow the usual staging pattern: uploads go
//! through `Queue::write_buffer`, downloads copy into a `MAP_READ` buffer
//! and block on `Device::poll`.

mod network;
pub mod sources;

pub use network::{GpuNetwork, GpuNeurons, GpuSynapses};
pub use sources::{KernelSources, MAX_SOURCE_LEN};

use super::Provider;
use crate::backend::Backend;
use crate::error::{Error, ErrorKind, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Workgroup width of the per-neuron entry points.
pub const WORKGROUP_SIZE: u32 = 64;

/// Basic wrapper for common GPU errors.
#[derive(Debug)]
pub enum GpuError {
    /// No adapter could be requested.
    Adapter(wgpu::RequestAdapterError),
    /// The configured adapter index is out of range.
    AdapterIndex {
        /// Requested index.
        index: usize,
        /// Adapters present.
        available: usize,
    },
    /// The device could not be created.
    Device(wgpu::RequestDeviceError),
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Adapter(e) => write!(f, "Adapter error: {e}"),
            Self::AdapterIndex { index, available } => {
                write!(f, "Adapter error: index {index} out of {available} adapters")
            }
            Self::Device(e) => write!(f, "Device error: {e}"),
        }
    }
}

impl std::error::Error for GpuError {}

impl From<GpuError> for Error {
    fn from(e: GpuError) -> Self {
        let kind = match e {
            GpuError::Adapter(_) | GpuError::AdapterIndex { .. } => ErrorKind::NotFound,
            GpuError::Device(_) => ErrorKind::OperationFailed,
        };
        Self::new(kind, e.to_string())
    }
}

/// Holds the adapter description, device and queue of an initialized
/// provider.
#[derive(Debug)]
pub struct GpuContext {
    /// The selected adapter.
    pub info: wgpu::AdapterInfo,
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// A queue for commands related to the device.
    pub queue: wgpu::Queue,
}

fn preference(device_type: wgpu::DeviceType) -> u8 {
    match device_type {
        wgpu::DeviceType::DiscreteGpu
        | wgpu::DeviceType::IntegratedGpu
        | wgpu::DeviceType::VirtualGpu => 0,
        wgpu::DeviceType::Cpu => 1,
        wgpu::DeviceType::Other => 2,
    }
}

/// Describes every adapter visible to WGPU, in enumeration order. The
/// positions are the indices accepted by [`GpuConfig::adapter`].
#[must_use]
pub fn list_adapters() -> Vec<wgpu::AdapterInfo> {
    wgpu::Instance::default()
        .enumerate_adapters(wgpu::Backends::all())
        .iter()
        .map(wgpu::Adapter::get_info)
        .collect()
}

impl GpuContext {
    /// Opens a device on adapter `index`, or on the preferred adapter when
    /// `index` is `None`.
    ///
    /// # Errors
    /// - [`GpuError::AdapterIndex`] for an index past the adapter list.
    /// - [`GpuError::Adapter`] if no adapter exists.
    /// - [`GpuError::Device`] if the device request fails.
    pub fn new(index: Option<usize>) -> core::result::Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let mut adapters = instance.enumerate_adapters(wgpu::Backends::all());
        let adapter = match index {
            Some(index) => {
                if index >= adapters.len() {
                    return Err(GpuError::AdapterIndex {
                        index,
                        available: adapters.len(),
                    });
                }
                adapters.swap_remove(index)
            }
            None => match adapters
                .iter()
                .enumerate()
                .min_by_key(|(_, a)| preference(a.get_info().device_type))
                .map(|(i, _)| i)
            {
                Some(best) => adapters.swap_remove(best),
                None => pollster::block_on(
                    instance.request_adapter(&wgpu::RequestAdapterOptions::default()),
                )
                .map_err(GpuError::Adapter)?,
            },
        };
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("briny_infer"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(GpuError::Device)?;
        Ok(Self {
            info: adapter.get_info(),
            device,
            queue,
        })
    }

    /// Blocks until all submitted work has finished.
    ///
    /// # Errors
    /// - `OperationFailed` if the device is lost or the wait times out.
    pub fn finish(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| Error::operation_failed(format!("device poll failed: {e}")))
    }

    /// Copies `count` floats out of `buffer` through a staging buffer.
    ///
    /// # Errors
    /// - `OperationFailed` if mapping or polling fails.
    pub fn read_back(&self, buffer: &wgpu::Buffer, count: usize) -> Result<Vec<f32>> {
        let size = (count * size_of::<f32>()) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("read_back_encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.finish()?;
        receiver
            .recv()
            .map_err(|_| Error::operation_failed("buffer mapping was abandoned"))?
            .map_err(|e| Error::operation_failed(format!("buffer mapping failed: {e}")))?;

        let data = slice.get_mapped_range();
        let values = bytemuck::try_cast_slice::<u8, f32>(&data)
            .map_err(|e| Error::operation_failed(format!("mapped range is not f32: {e}")))?
            .to_vec();
        drop(data);
        staging.unmap();
        Ok(values)
    }
}

/// GPU backend tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuConfig {
    /// Adapter index from [`list_adapters`]; `None` picks by preference
    /// (discrete, integrated or virtual GPU, then CPU, then anything).
    pub adapter: Option<usize>,
    /// Program the provider builds.
    pub sources: KernelSources,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            sources: KernelSources::builtin(),
        }
    }
}

impl GpuConfig {
    /// Selects adapter `index`.
    #[must_use]
    pub fn with_adapter(mut self, index: usize) -> Self {
        self.adapter = Some(index);
        self
    }

    /// Replaces the kernel sources.
    #[must_use]
    pub fn with_sources(mut self, sources: KernelSources) -> Self {
        self.sources = sources;
        self
    }
}

/// Compiled pipelines, one per entry point.
#[derive(Debug)]
pub(crate) struct Pipelines {
    pub(crate) compute: wgpu::ComputePipeline,
    pub(crate) compute_with_bias: wgpu::ComputePipeline,
    pub(crate) exp_sum: wgpu::ComputePipeline,
    pub(crate) activate: wgpu::ComputePipeline,
}

/// Everything a mirror network needs from its provider.
#[derive(Debug)]
pub(crate) struct GpuState {
    pub(crate) ctx: GpuContext,
    pub(crate) layout: wgpu::BindGroupLayout,
    pub(crate) pipelines: Pipelines,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn build(ctx: GpuContext, program: &str) -> core::result::Result<GpuState, String> {
    let device = &ctx.device;
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("briny_infer_kernels"),
        source: wgpu::ShaderSource::Wgsl(program.into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("edge_bgl"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(network::PARAMS_SIZE),
                },
                count: None,
            },
            storage_entry(1, true),
            storage_entry(2, true),
            storage_entry(3, true),
            storage_entry(4, false),
            storage_entry(5, false),
        ],
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("edge_pipeline_layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = |entry: &str| {
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(entry),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        })
    };
    let pipelines = Pipelines {
        compute: pipeline("compute"),
        compute_with_bias: pipeline("compute_with_bias"),
        exp_sum: pipeline("exp_sum"),
        activate: pipeline("activate"),
    };

    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(error.to_string());
    }
    Ok(GpuState {
        ctx,
        layout,
        pipelines,
    })
}

/// Provider of GPU mirrors.
#[derive(Debug, Default)]
pub struct GpuProvider {
    state: Option<Arc<GpuState>>,
    build_log: String,
}

impl GpuProvider {
    /// Creates an uninitialized provider.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: None,
            build_log: String::new(),
        }
    }

    /// Compiler output of the last failed program build, empty otherwise.
    #[must_use]
    pub fn build_log(&self) -> &str {
        &self.build_log
    }

    /// The adapter in use, `None` before init.
    #[must_use]
    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        self.state.as_ref().map(|s| &s.ctx.info)
    }
}

impl Provider for GpuProvider {
    type Config = GpuConfig;
    type Network = GpuNetwork;

    fn backend(&self) -> Backend {
        Backend::Wgpu
    }

    fn init(&mut self, config: Option<&GpuConfig>) -> Result<()> {
        self.uninit();
        self.build_log.clear();
        let default;
        let config = match config {
            Some(config) => config,
            None => {
                default = GpuConfig::default();
                &default
            }
        };
        let program = config.sources.program()?;
        let ctx = GpuContext::new(config.adapter)?;
        debug!(adapter = %ctx.info.name, backend = ?ctx.info.backend, "device opened");
        match build(ctx, &program) {
            Ok(state) => {
                info!(
                    backend = %Backend::Wgpu,
                    adapter = %state.ctx.info.name,
                    device_type = ?state.ctx.info.device_type,
                    "provider initialized"
                );
                self.state = Some(Arc::new(state));
                Ok(())
            }
            Err(log) => {
                warn!(build_log = %log, "kernel build failed");
                self.build_log = log;
                Err(Error::operation_failed("kernel build failed; see build_log()"))
            }
        }
    }

    fn uninit(&mut self) {
        if self.state.take().is_some() {
            debug!(backend = %Backend::Wgpu, "provider released");
        }
    }

    fn is_ok(&self) -> bool {
        self.state.is_some()
    }

    fn create_network(&self) -> Result<GpuNetwork> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| Error::not_initialized("provider is not initialized"))?;
        Ok(GpuNetwork::new(Arc::clone(state)))
    }
}
