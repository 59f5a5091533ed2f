//! Worker-pool CPU backend.
//!
//! The provider owns a [`WorkerPool`] of persistent threads. A mirror
//! network evaluates each edge as two dispatches over the destination
//! width: the weighted sum (with or without bias), then the activation.
//! SoftMax gets its layer-wide `Σ e^x` on the calling thread between the
//! two.
//!
//! Mirror networks hold a reference to the pool they were created from,
//! so the threads stay alive until the provider and every network created
//! from it are gone.

pub mod cells;
pub mod kernels;
pub mod scheduler;

pub use cells::FloatCells;
pub use scheduler::{Assignment, Dims, Kernel, MAX_DIMS, WorkerPool, partition};

use super::{
    ComputeNetwork, ComputeNeurons, ComputeSynapses, Endpoint, Provider, SyncType, check_batch,
    sync_nodes_from_ce, sync_nodes_to_ce,
};
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::graph::Chain;
use crate::net::{self, Activation, ActivationArgs};
use kernels::{ActivateKernel, CellSlice, ComputeKernel, ComputeWithBiasKernel};
use std::sync::Arc;
use tracing::{debug, info};

/// Worker-pool tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub threads: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let physical = num_cpus::get_physical();
        let threads = if physical > 0 {
            physical
        } else {
            num_cpus::get()
        };
        Self {
            threads: threads.max(1),
        }
    }
}

impl PoolConfig {
    /// Overrides the thread count. Zero is raised to one.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = if threads == 0 { 1 } else { threads };
        self
    }
}

/// Provider of worker-pool mirrors.
#[derive(Debug, Default)]
pub struct PoolProvider {
    pool: Option<Arc<WorkerPool>>,
}

impl PoolProvider {
    /// Creates an uninitialized provider.
    #[must_use]
    pub const fn new() -> Self {
        Self { pool: None }
    }

    /// Number of worker threads, `0` before init.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(0, |p| p.threads())
    }

    /// Runs an arbitrary kernel over `dims` on the provider's pool.
    ///
    /// # Errors
    /// - `NotInitialized` before init.
    /// - `InvalidArg` for an unsupported rank or item count.
    /// - `OperationFailed` if the dispatch fails.
    pub fn run_kernel(&self, kernel: Arc<dyn Kernel>, dims: &[u32]) -> Result<()> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| Error::not_initialized("provider is not initialized"))?;
        pool.run_kernel(kernel, Dims::new(dims)?)
    }
}

impl Provider for PoolProvider {
    type Config = PoolConfig;
    type Network = PoolNetwork;

    fn backend(&self) -> Backend {
        Backend::Pool
    }

    fn init(&mut self, config: Option<&PoolConfig>) -> Result<()> {
        self.uninit();
        let threads = config.copied().unwrap_or_default().threads.max(1);
        self.pool = Some(Arc::new(WorkerPool::new(threads)?));
        info!(backend = %Backend::Pool, threads, "provider initialized");
        Ok(())
    }

    /// Releases the provider's handle on the pool.
    ///
    /// Networks created by this provider share the pool, so its workers are
    /// stopped and joined when the last of them is dropped. With no live
    /// networks that happens here.
    fn uninit(&mut self) {
        if self.pool.take().is_some() {
            debug!(backend = %Backend::Pool, "provider released");
        }
    }

    fn is_ok(&self) -> bool {
        self.pool.is_some()
    }

    fn create_network(&self) -> Result<PoolNetwork> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| Error::not_initialized("provider is not initialized"))?;
        Ok(PoolNetwork {
            pool: Arc::clone(pool),
            chain: Chain::new(),
        })
    }
}

/// Pool-resident neuron group.
#[derive(Debug)]
pub struct PoolNeurons {
    values: Arc<FloatCells>,
    activation: Activation,
    args: ActivationArgs,
}

impl PoolNeurons {
    fn mirror(source: &net::Neurons) -> Self {
        Self {
            values: Arc::new(FloatCells::from_slice(source.values())),
            activation: source.activation(),
            args: *source.activation_args(),
        }
    }

    /// Snapshot of the mirrored values.
    #[must_use]
    pub fn values(&self) -> Vec<f32> {
        self.values.to_vec()
    }

    fn check_width(&self, other: usize) -> Result<()> {
        if self.values.len() == other {
            Ok(())
        } else {
            Err(Error::invalid_arg(format!(
                "neuron width mismatch ({} vs {other})",
                self.values.len()
            )))
        }
    }
}

impl ComputeNeurons for PoolNeurons {
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
        self.check_width(source.values().len())?;
        self.values.store_from(0, source.values());
        Ok(())
    }

    fn sync_from_ce(&self, target: &mut net::Neurons) -> Result<()> {
        self.check_width(target.values().len())?;
        self.values.load_into(0, target.values_mut());
        Ok(())
    }
}

/// Pool-resident synapse edge.
#[derive(Debug)]
pub struct PoolSynapses {
    prev: u32,
    next: u32,
    weights: Arc<Vec<f32>>,
    biases: Arc<Vec<f32>>,
    bias: Option<f32>,
}

impl PoolSynapses {
    fn mirror(source: &net::Synapses) -> Self {
        Self {
            prev: source.prev_count(),
            next: source.next_count(),
            weights: Arc::new(source.weights().to_vec()),
            biases: Arc::new(source.biases().to_vec()),
            bias: source.has_bias().then(|| source.bias_multiplier()),
        }
    }
}

impl ComputeSynapses for PoolSynapses {
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
        super::cpu::copy_checked(
            source.weights(),
            Arc::make_mut(&mut self.weights).as_mut_slice(),
        )?;
        super::cpu::copy_checked(source.biases(), Arc::make_mut(&mut self.biases).as_mut_slice())
    }

    fn sync_from_ce(&self, target: &mut net::Synapses) -> Result<()> {
        super::cpu::copy_checked(&self.weights, target.weights_mut())?;
        super::cpu::copy_checked(&self.biases, target.biases_mut())
    }
}

/// Worker-pool mirror network.
#[derive(Debug)]
pub struct PoolNetwork {
    pool: Arc<WorkerPool>,
    chain: Chain<PoolNeurons, PoolSynapses>,
}

impl PoolNetwork {
    fn widths(&self) -> Option<(u32, u32)> {
        let input = self.input_neurons()?.count();
        let output = self.output_neurons()?.count();
        Some((input, output))
    }

    fn window(
        &self,
        endpoint: Endpoint,
        inputs: &Arc<FloatCells>,
        outputs: &Arc<FloatCells>,
    ) -> CellSlice {
        match endpoint {
            Endpoint::Input(offset) => CellSlice::new(Arc::clone(inputs), offset),
            Endpoint::Output(offset) => CellSlice::new(Arc::clone(outputs), offset),
            Endpoint::Resident(id) => CellSlice::new(Arc::clone(&self.chain[id].values), 0),
        }
    }
}

impl ComputeNetwork for PoolNetwork {
    type Neurons = PoolNeurons;
    type Synapses = PoolSynapses;

    fn backend(&self) -> Backend {
        Backend::Pool
    }

    fn init(&mut self, topology: &net::Network) -> Result<()> {
        self.uninit();
        if !topology.is_ok() {
            return Err(Error::invalid_arg("topology is not initialized"));
        }
        self.chain = Chain::try_mirror(
            topology.chain(),
            |n| Ok::<_, Error>(PoolNeurons::mirror(n)),
            |s| Ok(PoolSynapses::mirror(s)),
        )?;
        debug!(
            backend = %Backend::Pool,
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

    fn chain(&self) -> &Chain<PoolNeurons, PoolSynapses> {
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
        let staged_in = Arc::new(FloatCells::from_slice(inputs));
        let staged_out = Arc::new(FloatCells::zeroed(outputs.len()));
        for sample in 0..count as usize {
            for edge in self.chain.edges() {
                let (from, to) = Endpoint::resolve(&self.chain, edge, sample * iw, sample * ow);
                let src = self.window(from, &staged_in, &staged_out);
                let dst = self.window(to, &staged_in, &staged_out);
                let synapses = &self.chain[edge];
                let next = synapses.next;
                let product = ComputeKernel {
                    src,
                    weights: Arc::clone(&synapses.weights),
                    dst: dst.clone(),
                    prev: synapses.prev as usize,
                    next: next as usize,
                };
                let kernel: Arc<dyn Kernel> = match synapses.bias {
                    Some(multiplier) => Arc::new(ComputeWithBiasKernel {
                        product,
                        biases: Arc::clone(&synapses.biases),
                        multiplier,
                    }),
                    None => Arc::new(product),
                };
                self.pool.run_kernel(kernel, Dims::linear(next))?;

                let neurons = &self.chain[Chain::<PoolNeurons, PoolSynapses>::next_neurons(edge)];
                if neurons.activation == Activation::Identity {
                    continue;
                }
                let exp_sum = if neurons.activation == Activation::SoftMax {
                    kernels::exp_sum(&dst, next as usize)
                } else {
                    0.0
                };
                let activate = ActivateKernel {
                    values: dst,
                    activation: neurons.activation,
                    args: neurons.args,
                    exp_sum,
                };
                self.pool.run_kernel(Arc::new(activate), Dims::linear(next))?;
            }
        }
        staged_out.load_into(0, outputs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::ce::cpu::CpuProvider;
    use crate::net::{Layer, SynapsesData};

    fn topology() -> net::Network {
        let mut net = net::Network::new();
        net.init(
            3,
            &[
                Layer::new(4, Activation::TanH).with_bias(1.0),
                Layer::new(3, Activation::SoftMax),
            ],
        )
        .unwrap();
        let w0: Vec<f32> = (0..12).map(|i| (i as f32 * 0.41).cos()).collect();
        let w1: Vec<f32> = (0..12).map(|i| (i as f32 * 0.73).sin()).collect();
        net.load_weights_and_biases(&[
            SynapsesData::new(w0, vec![0.1, 0.2, -0.3, 0.0]),
            SynapsesData::new(w1, vec![]),
        ])
        .unwrap();
        net
    }

    fn provider(threads: usize) -> PoolProvider {
        let mut provider = PoolProvider::new();
        provider
            .init(Some(&PoolConfig::default().with_threads(threads)))
            .unwrap();
        provider
    }

    #[test]
    fn config_defaults_to_host_cores() {
        assert!(PoolConfig::default().threads >= 1);
        assert_eq!(PoolConfig::default().with_threads(0).threads, 1);
    }

    #[test]
    fn provider_lifecycle() {
        let mut provider = PoolProvider::new();
        assert!(!provider.is_ok());
        assert_eq!(provider.create_network().unwrap_err().kind(), ErrorKind::NotInitialized);
        provider
            .init(Some(&PoolConfig::default().with_threads(2)))
            .unwrap();
        assert_eq!(provider.threads(), 2);
        provider.init(None).unwrap();
        assert!(provider.is_ok());
        provider.uninit();
        provider.uninit();
        assert_eq!(provider.threads(), 0);
    }

    #[test]
    fn provider_runs_custom_kernels() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let provider = provider(3);
        let hits = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&hits);
        provider
            .run_kernel(
                Arc::new(move |_: &[u32]| {
                    sink.fetch_add(1, Ordering::Relaxed);
                }),
                &[2, 3, 4],
            )
            .unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 24);
        let err = provider
            .run_kernel(Arc::new(|_: &[u32]| {}), &[1, 1, 1, 1])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
    }

    #[test]
    fn agrees_with_single_threaded_backend() {
        let topology = topology();
        let inputs = [0.3, -0.7, 1.1, 0.0, 0.5, -0.5, 2.0, 1.0, -1.0];

        let mut cpu = CpuProvider::new();
        cpu.init(None).unwrap();
        let mut reference = cpu.create_network().unwrap();
        reference.init(&topology).unwrap();
        let mut expected = [0.0; 9];
        reference.evaluate(3, &inputs, &mut expected).unwrap();

        for threads in [1, 2, 5] {
            let provider = provider(threads);
            let mut network = provider.create_network().unwrap();
            network.init(&topology).unwrap();
            let mut out = [0.0; 9];
            network.evaluate(3, &inputs, &mut out).unwrap();
            assert_eq!(out, expected, "{threads} threads");
        }
    }

    #[test]
    fn sync_round_trip() {
        let mut topology = topology();
        let provider = provider(2);
        let mut network = provider.create_network().unwrap();
        network.init(&topology).unwrap();

        let first = topology.chain().edges().next().unwrap();
        topology.synapses_mut(first).unwrap().weights_mut()[0] = 42.0;
        network.sync_to_ce(&topology, true, SyncType::SYNAPSES).unwrap();
        topology.synapses_mut(first).unwrap().weights_mut()[0] = 0.0;
        network.sync_from_ce(&mut topology, true, SyncType::ALL).unwrap();
        assert_eq!(topology.synapses(first).unwrap().weights()[0], 42.0);

        let mut out = [0.0; 3];
        network.evaluate(1, &[1.0, 1.0, 1.0], &mut out).unwrap();
        network.sync_from_ce(&mut topology, true, SyncType::NEURONS).unwrap();
        let hidden = topology.chain().neurons().nth(1).unwrap();
        assert!(hidden.values().iter().any(|&v| v != 0.0));
    }

    #[test]
    fn network_outlives_provider() {
        let topology = topology();
        let mut provider = provider(2);
        let mut network = provider.create_network().unwrap();
        network.init(&topology).unwrap();
        provider.uninit();
        let mut out = [0.0; 3];
        network.evaluate(1, &[0.0, 0.0, 0.0], &mut out).unwrap();
        assert!((out.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn pool_released_with_last_holder() {
        let topology = topology();
        let mut provider = provider(2);
        let mut network = provider.create_network().unwrap();
        network.init(&topology).unwrap();
        let pool = Arc::downgrade(&network.pool);

        provider.uninit();
        assert!(pool.upgrade().is_some());
        drop(network);
        assert!(pool.upgrade().is_none());

        let mut idle = self::provider(3);
        let network = idle.create_network().unwrap();
        let pool = Arc::downgrade(&network.pool);
        drop(network);
        idle.uninit();
        assert!(pool.upgrade().is_none());
    }

    #[test]
    fn evaluate_validates_buffers() {
        let topology = topology();
        let provider = provider(2);
        let mut network = provider.create_network().unwrap();
        let mut out = [0.0; 3];
        assert_eq!(
            network.evaluate(1, &[0.0; 3], &mut out).unwrap_err().kind(),
            ErrorKind::NotInitialized
        );
        network.init(&topology).unwrap();
        assert_eq!(
            network.evaluate(1, &[0.0; 2], &mut out).unwrap_err().kind(),
            ErrorKind::InvalidArg
        );
    }
}
