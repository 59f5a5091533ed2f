//! GPU mirror network.
//!
//! Every neuron group and synapse edge owns device buffers. Evaluation
//! encodes all samples of a batch into compute passes over those buffers,
//! with the caller's rows uploaded into one input buffer and read back
//! from one output buffer.
//!
//! # Parameter block
//!
//! Each (sample, edge) pair gets one 80-byte block in a uniform buffer,
//! at a 256-byte stride so it can be bound by dynamic offset:
//!
//! ```text
//! word  0  prev_count      word  4  bias multiplier (f32)
//! word  1  next_count      word  5  activation code
//! word  2  src_offset      word  6..8  padding
//! word  3  dst_offset      word  8..20 activation args (f32, zero padded)
//! ```

use super::{GpuState, WORKGROUP_SIZE};
use crate::backend::Backend;
use crate::ce::{
    ComputeNetwork, ComputeNeurons, ComputeSynapses, Endpoint, SyncType, check_batch,
    cpu::copy_checked, sync_nodes_from_ce, sync_nodes_to_ce,
};
use crate::error::{Error, ErrorKind, Result};
use crate::graph::{Chain, SynapsesId};
use crate::net::{self, Activation, ActivationArgs};
use core::ops::Range;
use std::sync::Arc;
use tracing::debug;
use wgpu::util::DeviceExt;

const PARAMS_WORDS: usize = 20;

/// Size of one parameter block in bytes.
pub(super) const PARAMS_SIZE: u64 = (PARAMS_WORDS * size_of::<u32>()) as u64;

const PARAMS_STRIDE: usize = 256;

/// Parameter blocks per submission.
const MAX_PARAM_ENTRIES: usize = 65_536;

fn params_block(
    synapses: &GpuSynapses,
    neurons: &GpuNeurons,
    src_offset: usize,
    dst_offset: usize,
) -> [u32; PARAMS_WORDS] {
    let mut words = [0; PARAMS_WORDS];
    words[0] = synapses.prev;
    words[1] = synapses.next;
    words[2] = src_offset as u32;
    words[3] = dst_offset as u32;
    words[4] = synapses.bias.unwrap_or(0.0).to_bits();
    words[5] = u32::from(neurons.activation.code());
    for (word, arg) in words[8..].iter_mut().zip(neurons.args.padded()) {
        *word = arg.to_bits();
    }
    words
}

const fn row_offset(endpoint: Endpoint) -> usize {
    match endpoint {
        Endpoint::Input(offset) | Endpoint::Output(offset) => offset,
        Endpoint::Resident(_) => 0,
    }
}

fn storage_buffer(state: &GpuState, label: &str, values: &[f32]) -> wgpu::Buffer {
    state
        .ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(values),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        })
}

/// Rejects a topology whose neuron or synapse buffers exceed what a single
/// storage binding on this device can hold.
fn check_limits(limits: &wgpu::Limits, topology: &net::Network) -> Result<()> {
    let max = limits
        .max_buffer_size
        .min(u64::from(limits.max_storage_buffer_binding_size));
    let fits = |label: &str, len: usize| {
        let bytes = (len * size_of::<f32>()) as u64;
        if bytes > max {
            return Err(Error::new(
                ErrorKind::MemAllocFailed,
                format!("{label} buffer of {bytes} bytes exceeds device limit of {max}"),
            ));
        }
        Ok(())
    };
    for neurons in topology.chain().neurons() {
        fits("neurons", neurons.values().len())?;
    }
    for synapses in topology.chain().synapses() {
        fits("weights", synapses.weights().len())?;
        fits("biases", synapses.biases().len())?;
    }
    Ok(())
}

/// Device-resident neuron group.
#[derive(Debug)]
pub struct GpuNeurons {
    count: u32,
    activation: Activation,
    args: ActivationArgs,
    values: wgpu::Buffer,
    state: Arc<GpuState>,
}

impl GpuNeurons {
    fn mirror(state: &Arc<GpuState>, source: &net::Neurons) -> Self {
        Self {
            count: source.count(),
            activation: source.activation(),
            args: *source.activation_args(),
            values: storage_buffer(state, "neurons", source.values()),
            state: Arc::clone(state),
        }
    }

    /// Reads the current values back from the device.
    ///
    /// # Errors
    /// - `OperationFailed` if the read-back fails.
    pub fn read_values(&self) -> Result<Vec<f32>> {
        self.state.ctx.read_back(&self.values, self.count as usize)
    }
}

impl ComputeNeurons for GpuNeurons {
    fn count(&self) -> u32 {
        self.count
    }

    fn activation(&self) -> Activation {
        self.activation
    }

    fn activation_args(&self) -> &ActivationArgs {
        &self.args
    }

    fn mem_size(&self) -> usize {
        size_of::<Self>() + self.values.size() as usize
    }

    fn sync_to_ce(&mut self, source: &net::Neurons) -> Result<()> {
        if source.count() != self.count {
            return Err(Error::invalid_arg(format!(
                "neuron width mismatch ({} vs {})",
                self.count,
                source.count()
            )));
        }
        self.state
            .ctx
            .queue
            .write_buffer(&self.values, 0, bytemuck::cast_slice(source.values()));
        Ok(())
    }

    fn sync_from_ce(&self, target: &mut net::Neurons) -> Result<()> {
        copy_checked(&self.read_values()?, target.values_mut())
    }
}

/// Device-resident synapse edge.
#[derive(Debug)]
pub struct GpuSynapses {
    prev: u32,
    next: u32,
    bias: Option<f32>,
    weights: wgpu::Buffer,
    // Four zero bytes when the edge has no bias.
    biases: wgpu::Buffer,
    state: Arc<GpuState>,
}

impl GpuSynapses {
    fn mirror(state: &Arc<GpuState>, source: &net::Synapses) -> Self {
        let biases = if source.has_bias() {
            storage_buffer(state, "biases", source.biases())
        } else {
            storage_buffer(state, "biases_placeholder", &[0.0])
        };
        Self {
            prev: source.prev_count(),
            next: source.next_count(),
            bias: source.has_bias().then(|| source.bias_multiplier()),
            weights: storage_buffer(state, "weights", source.weights()),
            biases,
            state: Arc::clone(state),
        }
    }

    fn check_shape(&self, source: &net::Synapses) -> Result<()> {
        if source.prev_count() == self.prev
            && source.next_count() == self.next
            && source.has_bias() == self.bias.is_some()
        {
            Ok(())
        } else {
            Err(Error::invalid_arg("synapse shape mismatch"))
        }
    }
}

impl ComputeSynapses for GpuSynapses {
    fn prev_count(&self) -> u32 {
        self.prev
    }

    fn next_count(&self) -> u32 {
        self.next
    }

    fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    fn bias_multiplier(&self) -> f32 {
        self.bias.unwrap_or(0.0)
    }

    fn mem_size(&self) -> usize {
        size_of::<Self>() + (self.weights.size() + self.biases.size()) as usize
    }

    fn sync_to_ce(&mut self, source: &net::Synapses) -> Result<()> {
        self.check_shape(source)?;
        let queue = &self.state.ctx.queue;
        queue.write_buffer(&self.weights, 0, bytemuck::cast_slice(source.weights()));
        if self.bias.is_some() {
            queue.write_buffer(&self.biases, 0, bytemuck::cast_slice(source.biases()));
        }
        Ok(())
    }

    fn sync_from_ce(&self, target: &mut net::Synapses) -> Result<()> {
        self.check_shape(target)?;
        let ctx = &self.state.ctx;
        let weights = ctx.read_back(&self.weights, self.prev as usize * self.next as usize)?;
        copy_checked(&weights, target.weights_mut())?;
        if self.bias.is_some() {
            let biases = ctx.read_back(&self.biases, self.next as usize)?;
            copy_checked(&biases, target.biases_mut())?;
        }
        Ok(())
    }
}

/// GPU mirror network.
#[derive(Debug)]
pub struct GpuNetwork {
    state: Arc<GpuState>,
    chain: Chain<GpuNeurons, GpuSynapses>,
}

impl GpuNetwork {
    pub(super) const fn new(state: Arc<GpuState>) -> Self {
        Self {
            state,
            chain: Chain::new(),
        }
    }

    fn widths(&self) -> Option<(u32, u32)> {
        let input = self.input_neurons()?.count();
        let output = self.output_neurons()?.count();
        Some((input, output))
    }

    fn bind_group(
        &self,
        edge: SynapsesId,
        params: &wgpu::Buffer,
        input: &wgpu::Buffer,
        output: &wgpu::Buffer,
        scratch: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        let (from, to) = Endpoint::resolve(&self.chain, edge, 0, 0);
        let src = match from {
            Endpoint::Resident(id) => &self.chain[id].values,
            _ => input,
        };
        let dst = match to {
            Endpoint::Resident(id) => &self.chain[id].values,
            _ => output,
        };
        let synapses = &self.chain[edge];
        self.state
            .ctx
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("edge_bind_group"),
                layout: &self.state.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: params,
                            offset: 0,
                            size: wgpu::BufferSize::new(PARAMS_SIZE),
                        }),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: src.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: synapses.weights.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: synapses.biases.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: dst.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: scratch.as_entire_binding(),
                    },
                ],
            })
    }

    /// Encodes and submits the forward passes of `samples`.
    fn submit_samples(
        &self,
        edges: &[SynapsesId],
        samples: Range<usize>,
        widths: (usize, usize),
        input: &wgpu::Buffer,
        output: &wgpu::Buffer,
        scratch: &wgpu::Buffer,
    ) {
        let ctx = &self.state.ctx;
        let (iw, ow) = widths;

        let mut blocks = vec![0u8; samples.len() * edges.len() * PARAMS_STRIDE];
        let mut slot = 0;
        for sample in samples.clone() {
            for &edge in edges {
                let (from, to) = Endpoint::resolve(&self.chain, edge, sample * iw, sample * ow);
                let next = &self.chain[Chain::<GpuNeurons, GpuSynapses>::next_neurons(edge)];
                let words = params_block(&self.chain[edge], next, row_offset(from), row_offset(to));
                let at = slot * PARAMS_STRIDE;
                blocks[at..at + PARAMS_SIZE as usize].copy_from_slice(bytemuck::cast_slice(&words));
                slot += 1;
            }
        }
        let params = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("edge_params"),
                contents: &blocks,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let groups: Vec<wgpu::BindGroup> = edges
            .iter()
            .map(|&edge| self.bind_group(edge, &params, input, output, scratch))
            .collect();

        let pipelines = &self.state.pipelines;
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("evaluate_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("evaluate_pass"),
                timestamp_writes: None,
            });
            let mut offset = 0u32;
            for _ in samples {
                for (group, &edge) in groups.iter().zip(edges) {
                    let synapses = &self.chain[edge];
                    let neurons = &self.chain[Chain::<GpuNeurons, GpuSynapses>::next_neurons(edge)];
                    let workgroups = synapses.next.div_ceil(WORKGROUP_SIZE);

                    pass.set_bind_group(0, group, &[offset]);
                    pass.set_pipeline(if synapses.bias.is_some() {
                        &pipelines.compute_with_bias
                    } else {
                        &pipelines.compute
                    });
                    pass.dispatch_workgroups(workgroups, 1, 1);

                    if neurons.activation != Activation::Identity {
                        if neurons.activation == Activation::SoftMax {
                            pass.set_pipeline(&pipelines.exp_sum);
                            pass.dispatch_workgroups(1, 1, 1);
                        }
                        pass.set_pipeline(&pipelines.activate);
                        pass.dispatch_workgroups(workgroups, 1, 1);
                    }
                    offset += PARAMS_STRIDE as u32;
                }
            }
        }
        ctx.queue.submit(Some(encoder.finish()));
    }
}

impl ComputeNetwork for GpuNetwork {
    type Neurons = GpuNeurons;
    type Synapses = GpuSynapses;

    fn backend(&self) -> Backend {
        Backend::Wgpu
    }

    fn init(&mut self, topology: &net::Network) -> Result<()> {
        self.uninit();
        if !topology.is_ok() {
            return Err(Error::invalid_arg("topology is not initialized"));
        }
        let device = &self.state.ctx.device;
        check_limits(&device.limits(), topology)?;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let state = Arc::clone(&self.state);
        let mirrored = Chain::try_mirror(
            topology.chain(),
            |n| Ok::<_, Error>(GpuNeurons::mirror(&state, n)),
            |s| Ok(GpuSynapses::mirror(&state, s)),
        );
        let invalid = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());
        if let Some(e) = invalid.or(oom) {
            return Err(Error::new(
                ErrorKind::MemAllocFailed,
                format!("device buffers: {e}"),
            ));
        }
        self.chain = mirrored?;
        debug!(
            backend = %Backend::Wgpu,
            layers = self.layers_count(),
            mem_size = self.mem_size(),
            "mirror initialized"
        );
        Ok(())
    }

    fn uninit(&mut self) {
        self.chain.clear();
    }

    fn is_ok(&self) -> bool {
        self.chain.layers_count() > 0
    }

    fn chain(&self) -> &Chain<GpuNeurons, GpuSynapses> {
        &self.chain
    }

    fn sync_to_ce(&mut self, topology: &net::Network, wait: bool, sync: SyncType) -> Result<()> {
        sync_nodes_to_ce(&mut self.chain, topology, sync)?;
        let ctx = &self.state.ctx;
        ctx.queue.submit(std::iter::empty());
        if wait {
            ctx.finish()?;
        }
        Ok(())
    }

    fn sync_from_ce(
        &mut self,
        topology: &mut net::Network,
        _wait: bool,
        sync: SyncType,
    ) -> Result<()> {
        sync_nodes_from_ce(&self.chain, topology, sync)
    }

    fn mem_size(&self) -> usize {
        size_of::<Self>()
            + self.chain.neurons().map(ComputeNeurons::mem_size).sum::<usize>()
            + self.chain.synapses().map(ComputeSynapses::mem_size).sum::<usize>()
    }

    fn evaluate(&mut self, count: u32, inputs: &[f32], outputs: &mut [f32]) -> Result<()> {
        let widths = check_batch(self.is_ok(), self.widths(), count, inputs, outputs)?;
        let ctx = &self.state.ctx;
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let input = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("batch_inputs"),
                contents: bytemuck::cast_slice(inputs),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let output = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("batch_outputs"),
            size: size_of_val(outputs) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let scratch = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("scratch"),
            size: size_of::<f32>() as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let edges: Vec<SynapsesId> = self.chain.edges().collect();
        let per_submit = (MAX_PARAM_ENTRIES / edges.len()).max(1);
        let count = count as usize;
        let mut start = 0;
        while start < count {
            let end = count.min(start + per_submit);
            self.submit_samples(&edges, start..end, widths, &input, &output, &scratch);
            start = end;
        }

        if let Some(e) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(Error::operation_failed(format!("evaluate failed: {e}")));
        }
        let values = ctx.read_back(&output, outputs.len())?;
        outputs.copy_from_slice(&values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ce::Provider;
    use crate::ce::cpu::CpuProvider;
    use crate::ce::wgpu::GpuProvider;
    use crate::net::{Layer, SynapsesData};
    use approx::assert_abs_diff_eq;

    fn provider() -> Option<GpuProvider> {
        let mut provider = GpuProvider::new();
        match provider.init(None) {
            Ok(()) => Some(provider),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => panic!("{e}"),
        }
    }

    fn topology(hidden: Activation, args: &[f32], output: Activation) -> net::Network {
        let mut net = net::Network::new();
        net.init(
            3,
            &[
                Layer::new(70, hidden).with_args(args).with_bias(0.5),
                Layer::new(4, output),
            ],
        )
        .unwrap();
        let w0: Vec<f32> = (0..210).map(|i| ((i * 7 % 13) as f32 - 6.0) * 0.05).collect();
        let b0: Vec<f32> = (0..70).map(|i| (i % 5) as f32 * 0.1 - 0.2).collect();
        let w1: Vec<f32> = (0..280).map(|i| ((i * 3 % 11) as f32 - 5.0) * 0.02).collect();
        net.load_weights_and_biases(&[SynapsesData::new(w0, b0), SynapsesData::new(w1, vec![])])
            .unwrap();
        net
    }

    fn reference(topology: &net::Network, count: u32, inputs: &[f32]) -> Vec<f32> {
        let mut cpu = CpuProvider::new();
        cpu.init(None).unwrap();
        let mut network = cpu.create_network().unwrap();
        network.init(topology).unwrap();
        let mut out = vec![0.0; count as usize * 4];
        network.evaluate(count, inputs, &mut out).unwrap();
        out
    }

    #[test]
    fn params_block_layout() {
        let words = [0u32; PARAMS_WORDS];
        assert_eq!(size_of_val(&words) as u64, PARAMS_SIZE);
        assert_eq!(PARAMS_SIZE, 80);
        assert_eq!(row_offset(Endpoint::Input(12)), 12);
    }

    #[test]
    fn buffers_over_device_limit_rejected() {
        let topology = topology(Activation::Relu, &[], Activation::Identity);
        // widest buffer is the 70 x 4 output weights, 1120 bytes
        let tight = wgpu::Limits {
            max_storage_buffer_binding_size: 1024,
            ..wgpu::Limits::default()
        };
        let err = check_limits(&tight, &topology).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemAllocFailed);
        assert!(err.message().starts_with("weights"));

        let roomy = wgpu::Limits {
            max_storage_buffer_binding_size: 1120,
            ..wgpu::Limits::default()
        };
        check_limits(&roomy, &topology).unwrap();

        let small_buffers = wgpu::Limits {
            max_buffer_size: 512,
            ..wgpu::Limits::default()
        };
        assert_eq!(
            check_limits(&small_buffers, &topology).unwrap_err().kind(),
            ErrorKind::MemAllocFailed
        );
    }

    #[test]
    fn matches_cpu_for_every_activation() {
        let Some(provider) = provider() else { return };
        let inputs: Vec<f32> = (0..15).map(|i| (i as f32 - 7.0) * 0.3).collect();
        for activation in Activation::ALL {
            let args: Vec<f32> = match activation.required_args() {
                0 => vec![],
                1 => vec![0.7],
                2 => vec![1.6, 1.05],
                _ => vec![-0.5, 0.1, 0.5, 0.2],
            };
            let topology = topology(activation, &args, Activation::SoftMax);
            let expected = reference(&topology, 5, &inputs);

            let mut network = provider.create_network().unwrap();
            network.init(&topology).unwrap();
            let mut out = vec![0.0; 20];
            network.evaluate(5, &inputs, &mut out).unwrap();
            for (&got, &want) in out.iter().zip(&expected) {
                if want.is_finite() {
                    assert_abs_diff_eq!(got, want, epsilon = 1e-4);
                }
            }
        }
    }

    #[test]
    fn sync_round_trip_on_device() {
        let Some(provider) = provider() else { return };
        let mut topology = topology(Activation::Relu, &[], Activation::Identity);
        let mut network = provider.create_network().unwrap();
        network.init(&topology).unwrap();

        let first = topology.chain().edges().next().unwrap();
        topology.synapses_mut(first).unwrap().biases_mut()[3] = 9.0;
        network.sync_to_ce(&topology, false, SyncType::SYNAPSES).unwrap();
        topology.synapses_mut(first).unwrap().biases_mut()[3] = 0.0;
        network.sync_from_ce(&mut topology, true, SyncType::ALL).unwrap();
        assert_eq!(topology.synapses(first).unwrap().biases()[3], 9.0);

        let mut out = [0.0; 4];
        network.evaluate(1, &[0.0, 0.0, 0.0], &mut out).unwrap();
        network.sync_from_ce(&mut topology, true, SyncType::NEURONS).unwrap();
        let hidden = topology.chain().neurons().nth(1).unwrap();
        assert_abs_diff_eq!(hidden.values()[3], 4.5, epsilon = 1e-6);
    }

    #[test]
    fn reshaped_topology_rejected() {
        let Some(provider) = provider() else { return };
        let topology = topology(Activation::Relu, &[], Activation::Identity);
        let mut network = provider.create_network().unwrap();
        network.init(&topology).unwrap();
        let mut other = net::Network::new();
        other
            .init(3, &[Layer::new(70, Activation::Relu), Layer::new(4, Activation::Identity)])
            .unwrap();
        let err = network.sync_to_ce(&other, true, SyncType::ALL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
    }
}
