//! Topology model.
//!
//! A [`Network`] is the canonical, backend-independent description of a
//! feed-forward net: an input neuron group followed by one or more layers,
//! each layer being the synapse edge that feeds it plus its own neuron
//! group. All buffers are host-resident `f32`.
//!
//! Backends never own the topology. They mirror it (see [`crate::ce`]) and
//! exchange values and weights with it through explicit sync calls.
//!
//! # Example
//!
//! ```rust
//! use briny_infer::net::{Activation, Layer, Network, SynapsesData};
//!
//! let mut net = Network::new();
//! net.init(2, &[
//!     Layer::new(4, Activation::Relu).with_bias(1.0),
//!     Layer::new(1, Activation::Sigmoid).with_bias(1.0),
//! ])?;
//! assert_eq!(net.layers_count(), 2);
//!
//! net.load_weights_and_biases(&[
//!     SynapsesData::new(vec![0.5; 8], vec![0.0; 4]),
//!     SynapsesData::new(vec![0.25; 4], vec![0.1]),
//! ])?;
//! # Ok::<(), briny_infer::Error>(())
//! ```

pub mod activation;
pub mod format;
mod neurons;
mod synapses;

pub use activation::{Activation, ActivationArgs, MAX_ACTIVATION_ARGS};
pub use neurons::Neurons;
pub use synapses::Synapses;

use crate::error::{Error, ErrorKind, Result};
use crate::graph::{Chain, NeuronsId, SynapsesId};
use core::fmt;
use tracing::debug;

/// Smallest neuron group.
pub const MIN_NEURONS: u32 = 1;
/// Largest neuron group.
pub const MAX_NEURONS: u32 = 65536;
/// Fewest non-input layers a network may have.
pub const MIN_LAYERS: u32 = 2;
/// Most non-input layers a network may have.
pub const MAX_LAYERS: u32 = 65536;

/// Zero-filled buffer of `len` floats; allocation failure is reported
/// instead of aborting.
pub(crate) fn zeroed(len: usize) -> Result<Vec<f32>> {
    let mut values = Vec::new();
    values.try_reserve_exact(len).map_err(|e| {
        Error::new(
            ErrorKind::MemAllocFailed,
            format!("cannot allocate {len} floats: {e}"),
        )
    })?;
    values.resize(len, 0.0);
    Ok(values)
}

/// Description of one non-input layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layer {
    /// Width of the layer.
    pub neurons: u32,
    /// Activation applied to the layer.
    pub activation: Activation,
    /// Activation parameters, at most [`MAX_ACTIVATION_ARGS`].
    pub args: Vec<f32>,
    /// Bias multiplier of the incoming edge; `None` disables bias.
    pub bias: Option<f32>,
}

impl Layer {
    /// A layer with no parameters and no bias.
    #[must_use]
    pub const fn new(neurons: u32, activation: Activation) -> Self {
        Self {
            neurons,
            activation,
            args: Vec::new(),
            bias: None,
        }
    }

    /// Sets the activation parameters.
    #[must_use]
    pub fn with_args(mut self, args: &[f32]) -> Self {
        self.args = args.to_vec();
        self
    }

    /// Enables the bias term with the given multiplier.
    #[must_use]
    pub const fn with_bias(mut self, multiplier: f32) -> Self {
        self.bias = Some(multiplier);
        self
    }
}

/// Weights and biases for one edge, as consumed by
/// [`Network::load_weights_and_biases`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SynapsesData {
    /// Row-major `prev × next` weights.
    pub weights: Vec<f32>,
    /// `next` biases; ignored for edges without bias.
    pub biases: Vec<f32>,
}

impl SynapsesData {
    /// Bundles a weight matrix and bias vector.
    #[must_use]
    pub const fn new(weights: Vec<f32>, biases: Vec<f32>) -> Self {
        Self { weights, biases }
    }
}

/// The topology: an arena chain of [`Neurons`] and [`Synapses`].
#[derive(Debug, Clone, Default)]
pub struct Network {
    chain: Chain<Neurons, Synapses>,
    mem_size: usize,
}

impl Network {
    /// Creates an uninitialized network.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chain: Chain::new(),
            mem_size: 0,
        }
    }

    /// Builds the chain: `input_neurons` inputs followed by `layers`.
    ///
    /// Any previous content is released first. Weights and biases start at
    /// zero.
    ///
    /// # Errors
    /// - `InvalidArg` if `input_neurons` is zero, there are fewer than
    ///   [`MIN_LAYERS`] or more than [`MAX_LAYERS`] layers, or any layer is
    ///   out of bounds. Every layer is checked before anything is allocated.
    /// - `MemAllocFailed` if a weight matrix cannot be allocated.
    ///
    /// On any failure the network is left uninitialized.
    pub fn init(&mut self, input_neurons: u32, layers: &[Layer]) -> Result<()> {
        self.uninit();
        if input_neurons < MIN_NEURONS {
            return Err(Error::invalid_arg(format!(
                "invalid input neurons count ({input_neurons})"
            )));
        }
        if layers.len() < MIN_LAYERS as usize || layers.len() > MAX_LAYERS as usize {
            return Err(Error::invalid_arg(format!(
                "invalid layers count ({})",
                layers.len()
            )));
        }
        Neurons::check(input_neurons, Activation::Identity, &[])?;
        for (i, layer) in layers.iter().enumerate() {
            Neurons::check(layer.neurons, layer.activation, &layer.args)
                .map_err(|e| Error::new(e.kind(), format!("layer {i}: {}", e.message())))?;
        }

        if let Err(err) = self.build(input_neurons, layers) {
            self.uninit();
            return Err(err);
        }
        debug!(layers = layers.len(), mem_size = self.mem_size, "topology initialized");
        Ok(())
    }

    fn build(&mut self, input_neurons: u32, layers: &[Layer]) -> Result<()> {
        let input = Neurons::new(input_neurons, Activation::Identity, &[])?;
        self.mem_size = size_of::<Self>() + input.mem_size();
        self.chain.push_input(input);

        let mut prev = input_neurons;
        for layer in layers {
            let synapses = Synapses::new(prev, layer.neurons, layer.bias)?;
            let neurons = Neurons::new(layer.neurons, layer.activation, &layer.args)?;
            self.mem_size += synapses.mem_size() + neurons.mem_size();
            self.chain.push_layer(synapses, neurons)?;
            prev = layer.neurons;
        }
        Ok(())
    }

    /// Releases every node. Safe to call repeatedly.
    pub fn uninit(&mut self) {
        self.chain.clear();
        self.mem_size = 0;
    }

    /// Returns `true` once [`Network::init`] has succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.chain.layers_count() > 0
    }

    /// Number of non-input layers.
    #[must_use]
    pub fn layers_count(&self) -> u32 {
        self.chain.layers_count() as u32
    }

    /// The underlying chain, for walking nodes in order.
    #[must_use]
    pub const fn chain(&self) -> &Chain<Neurons, Synapses> {
        &self.chain
    }

    /// Mutable access to the chain for node-wise syncs; the shape must not
    /// change through it.
    pub(crate) const fn chain_mut(&mut self) -> &mut Chain<Neurons, Synapses> {
        &mut self.chain
    }

    /// The input group, if initialized.
    #[must_use]
    pub fn input_neurons(&self) -> Option<&Neurons> {
        self.chain.input().map(|id| &self.chain[id])
    }

    /// The mutable input group, if initialized.
    pub fn input_neurons_mut(&mut self) -> Option<&mut Neurons> {
        self.chain.input().map(|id| &mut self.chain[id])
    }

    /// The output group, if initialized.
    #[must_use]
    pub fn output_neurons(&self) -> Option<&Neurons> {
        self.chain.output().map(|id| &self.chain[id])
    }

    /// The mutable output group, if initialized.
    pub fn output_neurons_mut(&mut self) -> Option<&mut Neurons> {
        self.chain.output().map(|id| &mut self.chain[id])
    }

    /// Neuron group at `id`.
    #[must_use]
    pub fn neurons(&self, id: NeuronsId) -> Option<&Neurons> {
        self.chain.get_neurons(id)
    }

    /// Mutable neuron group at `id`.
    pub fn neurons_mut(&mut self, id: NeuronsId) -> Option<&mut Neurons> {
        self.chain.get_neurons(id)?;
        Some(&mut self.chain[id])
    }

    /// Synapse edge at `id`.
    #[must_use]
    pub fn synapses(&self, id: SynapsesId) -> Option<&Synapses> {
        self.chain.get_synapses(id)
    }

    /// Mutable synapse edge at `id`.
    pub fn synapses_mut(&mut self, id: SynapsesId) -> Option<&mut Synapses> {
        self.chain.get_synapses(id)?;
        Some(&mut self.chain[id])
    }

    /// Copies one [`SynapsesData`] per layer into the edges, in order.
    ///
    /// # Errors
    /// - `NotInitialized` if the network has no layers.
    /// - `InvalidArg` if the entry count differs from the layer count, a
    ///   weight vector is not `prev × next` long, or a biased edge gets a
    ///   bias vector that is not `next` long. Nothing is copied then.
    pub fn load_weights_and_biases(&mut self, data: &[SynapsesData]) -> Result<()> {
        if !self.is_ok() {
            return Err(Error::not_initialized("network is not initialized"));
        }
        if data.len() != self.chain.layers_count() {
            return Err(Error::invalid_arg(format!(
                "got {} synapse entries for {} layers",
                data.len(),
                self.chain.layers_count()
            )));
        }
        for (i, (edge, entry)) in self.chain.synapses().zip(data).enumerate() {
            if entry.weights.len() != edge.weights_count() {
                return Err(Error::invalid_arg(format!(
                    "layer {i}: expected {} weights, got {}",
                    edge.weights_count(),
                    entry.weights.len()
                )));
            }
            if edge.has_bias() && entry.biases.len() != edge.biases_count() {
                return Err(Error::invalid_arg(format!(
                    "layer {i}: expected {} biases, got {}",
                    edge.biases_count(),
                    entry.biases.len()
                )));
            }
        }
        for (edge, entry) in self.chain.synapses_mut().zip(data) {
            edge.weights_mut().copy_from_slice(&entry.weights);
            if edge.has_bias() {
                edge.biases_mut().copy_from_slice(&entry.biases);
            }
        }
        Ok(())
    }

    /// Bytes held by the topology.
    #[must_use]
    pub const fn mem_size(&self) -> usize {
        self.mem_size
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_ok() {
            return Ok(());
        }
        writeln!(f, "Network:")?;
        writeln!(f, "  Layers: {}", self.layers_count())?;
        writeln!(f, "  Memory: {} bytes", self.mem_size)?;
        let mut edges = self.chain.synapses();
        for (i, neurons) in self.chain.neurons().enumerate() {
            writeln!(f, "Layer {}:", i + 1)?;
            writeln!(f, "  Neurons: {}", neurons.count())?;
            writeln!(f, "    Activation: {}", neurons.activation())?;
            let args = neurons.activation_args();
            writeln!(f, "    Activation args: {}", args.len())?;
            if !args.is_empty() {
                write!(f, "     ")?;
                for v in args.as_slice() {
                    write!(f, " {v:.6}")?;
                }
                writeln!(f)?;
            }
            if let Some(edge) = edges.next() {
                writeln!(f, "  Synapses: {} x {}", edge.prev_count(), edge.next_count())?;
                if edge.has_bias() {
                    writeln!(f, "    Bias: {:.6}", edge.bias_multiplier())?;
                }
            }
        }
        Ok(())
    }
}
