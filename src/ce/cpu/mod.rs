//! Single-threaded CPU backend.
//!
//! The mirror owns plain `Vec<f32>` copies of every node and evaluates on
//! the calling thread. It is the reference the other backends are tested
//! against.

pub mod kernels;

use super::{
    ComputeNetwork, ComputeNeurons, ComputeSynapses, Endpoint, Provider, SyncType, check_batch,
    sync_nodes_from_ce, sync_nodes_to_ce,
};
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::graph::Chain;
use crate::net::{self, Activation, ActivationArgs};
use tracing::debug;

/// The single-threaded backend takes no tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuConfig;

/// Provider of single-threaded mirrors.
#[derive(Debug, Default)]
pub struct CpuProvider {
    ready: bool,
}

impl CpuProvider {
    /// Creates an uninitialized provider.
    #[must_use]
    pub const fn new() -> Self {
        Self { ready: false }
    }
}

impl Provider for CpuProvider {
    type Config = CpuConfig;
    type Network = CpuNetwork;

    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn init(&mut self, _config: Option<&CpuConfig>) -> Result<()> {
        self.ready = true;
        debug!(backend = %Backend::Cpu, "provider initialized");
        Ok(())
    }

    fn uninit(&mut self) {
        self.ready = false;
    }

    fn is_ok(&self) -> bool {
        self.ready
    }

    fn create_network(&self) -> Result<CpuNetwork> {
        if self.ready {
            Ok(CpuNetwork::default())
        } else {
            Err(Error::not_initialized("provider is not initialized"))
        }
    }
}

/// Host copy of a neuron group.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuNeurons {
    values: Vec<f32>,
    activation: Activation,
    args: ActivationArgs,
}

impl CpuNeurons {
    fn mirror(source: &net::Neurons) -> Self {
        Self {
            values: source.values().to_vec(),
            activation: source.activation(),
            args: *source.activation_args(),
        }
    }

    /// Current mirrored values.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

impl ComputeNeurons for CpuNeurons {
    fn count(&self) -> u32 {
        self.values.len() as u32
    }

    fn activation(&self) -> Activation {
        self.activation
    }

    fn activation_args(&self) -> &ActivationArgs {
        &self.args
    }

    fn mem_size(&self) -> usize {
        size_of::<Self>() + self.values.len() * size_of::<f32>()
    }

    fn sync_to_ce(&mut self, source: &net::Neurons) -> Result<()> {
        copy_checked(source.values(), &mut self.values)
    }

    fn sync_from_ce(&self, target: &mut net::Neurons) -> Result<()> {
        copy_checked(&self.values, target.values_mut())
    }
}

/// Host copy of a synapse edge.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuSynapses {
    prev: u32,
    next: u32,
    weights: Vec<f32>,
    biases: Vec<f32>,
    bias: Option<f32>,
}

impl CpuSynapses {
    fn mirror(source: &net::Synapses) -> Self {
        Self {
            prev: source.prev_count(),
            next: source.next_count(),
            weights: source.weights().to_vec(),
            biases: source.biases().to_vec(),
            bias: source.has_bias().then(|| source.bias_multiplier()),
        }
    }
}

impl ComputeSynapses for CpuSynapses {
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
        size_of::<Self>() + (self.weights.len() + self.biases.len()) * size_of::<f32>()
    }

    fn sync_to_ce(&mut self, source: &net::Synapses) -> Result<()> {
        copy_checked(source.weights(), &mut self.weights)?;
        copy_checked(source.biases(), &mut self.biases)
    }

    fn sync_from_ce(&self, target: &mut net::Synapses) -> Result<()> {
        copy_checked(&self.weights, target.weights_mut())?;
        copy_checked(&self.biases, target.biases_mut())
    }
}

pub(crate) fn copy_checked(src: &[f32], dst: &mut [f32]) -> Result<()> {
    if src.len() != dst.len() {
        return Err(Error::invalid_arg(format!(
            "buffer length mismatch ({} vs {})",
            src.len(),
            dst.len()
        )));
    }
    dst.copy_from_slice(src);
    Ok(())
}

/// Single-threaded mirror network.
#[derive(Debug, Default)]
pub struct CpuNetwork {
    chain: Chain<CpuNeurons, CpuSynapses>,
}

impl CpuNetwork {
    fn widths(&self) -> Option<(u32, u32)> {
        let input = self.input_neurons()?.count();
        let output = self.output_neurons()?.count();
        Some((input, output))
    }
}

impl ComputeNetwork for CpuNetwork {
    type Neurons = CpuNeurons;
    type Synapses = CpuSynapses;

    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn init(&mut self, topology: &net::Network) -> Result<()> {
        self.uninit();
        if !topology.is_ok() {
            return Err(Error::invalid_arg("topology is not initialized"));
        }
        self.chain = Chain::try_mirror(
            topology.chain(),
            |n| Ok::<_, Error>(CpuNeurons::mirror(n)),
            |s| Ok(CpuSynapses::mirror(s)),
        )?;
        debug!(backend = %Backend::Cpu, layers = self.layers_count(), mem_size = self.mem_size(), "mirror initialized");
        Ok(())
    }

    fn uninit(&mut self) {
        self.chain.clear();
    }

    fn is_ok(&self) -> bool {
        self.chain.layers_count() > 0
    }

    fn chain(&self) -> &Chain<CpuNeurons, CpuSynapses> {
        &self.chain
    }

    fn sync_to_ce(&mut self, topology: &net::Network, _wait: bool, sync: SyncType) -> Result<()> {
        sync_nodes_to_ce(&mut self.chain, topology, sync)
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
        let (iw, ow) = check_batch(self.is_ok(), self.widths(), count, inputs, outputs)?;
        for sample in 0..count as usize {
            let (in_off, out_off) = (sample * iw, sample * ow);
            for edge in self.chain.edges() {
                let (from, to) = Endpoint::resolve(&self.chain, edge, in_off, out_off);
                let (prev, synapses, next) = self.chain.edge_mut(edge);
                let src = match from {
                    Endpoint::Input(o) => &inputs[o..o + iw],
                    _ => prev.values.as_slice(),
                };
                let (activation, args) = (next.activation, next.args);
                let dst = match to {
                    Endpoint::Output(o) => &mut outputs[o..o + ow],
                    _ => next.values.as_mut_slice(),
                };
                match synapses.bias {
                    Some(multiplier) => kernels::compute_with_bias(
                        src,
                        &synapses.weights,
                        &synapses.biases,
                        multiplier,
                        dst,
                    ),
                    None => kernels::compute(src, &synapses.weights, dst),
                }
                kernels::activate(dst, activation, &args);
            }
        }
        Ok(())
    }
}
