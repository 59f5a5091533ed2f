//! Compute-engine contract.
//!
//! A compute engine ("CE") executes a topology [`Network`](crate::net::Network)
//! on some backend. Every backend supplies the same four pieces:
//!
//! - a [`Provider`] that owns backend resources (nothing, a worker pool,
//!   or a GPU device) and creates mirror networks;
//! - a [`ComputeNetwork`], the mirror: an isomorphic [`Chain`] of
//!   backend-resident buffers built from the topology;
//! - [`ComputeNeurons`] and [`ComputeSynapses`], the mirror nodes.
//!
//! The mirror never borrows the topology. Data only moves between the two
//! through [`ComputeNetwork::sync_to_ce`] and [`ComputeNetwork::sync_from_ce`],
//! and every sync verifies that the shapes still correspond.
//!
//! # Forward evaluation
//!
//! Each backend walks its chain edge by edge for every sample. The source
//! of the first edge is the caller's input slice, the destination of the
//! last edge is the caller's output slice, and everything in between is
//! resident in the mirror ([`Endpoint`]).
//!
//! # Backends
//!
//! - [`cpu`]: single-threaded reference.
//! - [`pool`]: fixed worker pool with N-D range partitioning.
//! - `wgpu`: GPU compute shaders (feature `wgpu`).
//!
//! [`dispatch`] wraps all three in sum types for callers that choose the
//! backend at runtime.

pub mod cpu;
pub mod dispatch;
pub mod pool;
#[cfg(feature = "wgpu")]
pub mod wgpu;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::graph::{Chain, NeuronsId, SynapsesId};
use crate::net::{self, Activation, ActivationArgs};
use core::ops::{BitAnd, BitOr};

/// Selects what a sync call moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncType(u8);

impl SyncType {
    /// Neuron values only.
    pub const NEURONS: Self = Self(1);
    /// Weights and biases only.
    pub const SYNAPSES: Self = Self(2);
    /// Everything.
    pub const ALL: Self = Self(3);

    /// Returns `true` if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bitmask.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for SyncType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for SyncType {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Backend resource owner and mirror-network factory.
pub trait Provider {
    /// Backend tuning object accepted by [`Provider::init`].
    type Config: Default;
    /// Mirror network produced by [`Provider::create_network`].
    type Network: ComputeNetwork;

    /// Backend tag.
    fn backend(&self) -> Backend;

    /// Returns a default configuration for this backend.
    fn create_config(&self) -> Self::Config {
        Self::Config::default()
    }

    /// Acquires backend resources. A second call re-initializes.
    ///
    /// # Errors
    /// `OperationFailed`, `MemAllocFailed` or `NotFound` when resources are
    /// missing; nothing stays allocated then.
    fn init(&mut self, config: Option<&Self::Config>) -> Result<()>;

    /// Releases backend resources. Safe to call repeatedly.
    fn uninit(&mut self);

    /// Returns `true` between a successful `init` and `uninit`.
    fn is_ok(&self) -> bool;

    /// Creates an uninitialized mirror network bound to this provider.
    ///
    /// # Errors
    /// `NotInitialized` if the provider is not initialized.
    fn create_network(&self) -> Result<Self::Network>;
}

/// Backend mirror of one topology neuron group.
pub trait ComputeNeurons {
    /// Number of neurons.
    fn count(&self) -> u32;
    /// Activation applied to the group.
    fn activation(&self) -> Activation;
    /// Activation parameters.
    fn activation_args(&self) -> &ActivationArgs;
    /// Bytes held by the backend for this group.
    fn mem_size(&self) -> usize;
    /// Copies host values into the mirror.
    ///
    /// # Errors
    /// `InvalidArg` if `source` has a different width.
    fn sync_to_ce(&mut self, source: &net::Neurons) -> Result<()>;
    /// Copies mirror values back to the host.
    ///
    /// # Errors
    /// `InvalidArg` if `target` has a different width.
    fn sync_from_ce(&self, target: &mut net::Neurons) -> Result<()>;
}

/// Backend mirror of one topology synapse edge.
pub trait ComputeSynapses {
    /// Width of the source group.
    fn prev_count(&self) -> u32;
    /// Width of the destination group.
    fn next_count(&self) -> u32;
    /// Whether a bias term is added.
    fn has_bias(&self) -> bool;
    /// Scalar applied to every bias.
    fn bias_multiplier(&self) -> f32;
    /// Bytes held by the backend for this edge.
    fn mem_size(&self) -> usize;
    /// Copies host weights and biases into the mirror.
    ///
    /// # Errors
    /// `InvalidArg` if `source` has a different shape.
    fn sync_to_ce(&mut self, source: &net::Synapses) -> Result<()>;
    /// Copies mirror weights and biases back to the host.
    ///
    /// # Errors
    /// `InvalidArg` if `target` has a different shape.
    fn sync_from_ce(&self, target: &mut net::Synapses) -> Result<()>;
}

/// Backend mirror of a topology network.
///
/// ```text
/// Uninitialized ──init ok──▶ Ready ──uninit / failed init──▶ Uninitialized
/// ```
///
/// `evaluate` and the sync calls are only valid in `Ready`.
pub trait ComputeNetwork {
    /// Mirror neuron group type.
    type Neurons: ComputeNeurons;
    /// Mirror synapse edge type.
    type Synapses: ComputeSynapses;

    /// Backend tag.
    fn backend(&self) -> Backend;

    /// Builds the mirror chain from `topology` and uploads its current
    /// values and weights.
    ///
    /// # Errors
    /// `InvalidArg` if `topology` is not initialized; backend allocation
    /// errors otherwise. A failure leaves the mirror uninitialized.
    fn init(&mut self, topology: &net::Network) -> Result<()>;

    /// Drops the mirror chain. Safe to call repeatedly.
    fn uninit(&mut self);

    /// Returns `true` in the `Ready` state.
    fn is_ok(&self) -> bool;

    /// The mirror chain.
    fn chain(&self) -> &Chain<Self::Neurons, Self::Synapses>;

    /// Number of non-input layers.
    fn layers_count(&self) -> u32 {
        self.chain().layers_count() as u32
    }

    /// Mirror of the input group.
    fn input_neurons(&self) -> Option<&Self::Neurons> {
        let chain = self.chain();
        chain.input().map(|id| &chain[id])
    }

    /// Mirror of the output group.
    fn output_neurons(&self) -> Option<&Self::Neurons> {
        let chain = self.chain();
        chain.output().map(|id| &chain[id])
    }

    /// Pushes host data selected by `sync` into the mirror. With
    /// `wait == false` an asynchronous backend may return before the
    /// transfer completes.
    ///
    /// # Errors
    /// `NotInitialized` before `init`; `InvalidArg` if `topology` no longer
    /// has the mirrored shape.
    fn sync_to_ce(&mut self, topology: &net::Network, wait: bool, sync: SyncType) -> Result<()>;

    /// Pulls mirror data selected by `sync` back into the host topology.
    ///
    /// # Errors
    /// `NotInitialized` before `init`; `InvalidArg` if `topology` no longer
    /// has the mirrored shape.
    fn sync_from_ce(&mut self, topology: &mut net::Network, wait: bool, sync: SyncType)
    -> Result<()>;

    /// Bytes held by the backend for the whole mirror.
    fn mem_size(&self) -> usize;

    /// Runs `count` forward passes. `inputs` holds `count` rows of input
    /// width, `outputs` receives `count` rows of output width.
    ///
    /// # Errors
    /// `NotInitialized` before `init`; `InvalidArg` if `count` is zero or a
    /// buffer length is not `count` times its row width.
    fn evaluate(&mut self, count: u32, inputs: &[f32], outputs: &mut [f32]) -> Result<()>;
}

/// Where an edge reads from or writes to during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Caller input buffer, starting at the given element.
    Input(usize),
    /// A neuron group resident in the mirror.
    Resident(NeuronsId),
    /// Caller output buffer, starting at the given element.
    Output(usize),
}

impl Endpoint {
    /// Resolves the source and destination of `edge` for the sample whose
    /// rows start at `input_offset` and `output_offset`.
    #[must_use]
    pub fn resolve<N, S>(
        chain: &Chain<N, S>,
        edge: SynapsesId,
        input_offset: usize,
        output_offset: usize,
    ) -> (Self, Self) {
        let src = if chain.is_first_edge(edge) {
            Self::Input(input_offset)
        } else {
            Self::Resident(Chain::<N, S>::prev_neurons(edge))
        };
        let dst = if chain.is_last_edge(edge) {
            Self::Output(output_offset)
        } else {
            Self::Resident(Chain::<N, S>::next_neurons(edge))
        };
        (src, dst)
    }
}

/// Validates `evaluate` arguments against the mirror's input and output
/// widths and returns those widths.
pub(crate) fn check_batch(
    ready: bool,
    widths: Option<(u32, u32)>,
    count: u32,
    inputs: &[f32],
    outputs: &[f32],
) -> Result<(usize, usize)> {
    let Some((input_width, output_width)) = widths.filter(|_| ready) else {
        return Err(Error::not_initialized("network is not initialized"));
    };
    if count == 0 {
        return Err(Error::invalid_arg("count must be positive"));
    }
    let (iw, ow) = (input_width as usize, output_width as usize);
    let n = count as usize;
    if inputs.len() != n * iw || outputs.len() != n * ow {
        return Err(Error::invalid_arg(format!(
            "expected {} inputs and {} outputs for {count} samples, got {} and {}",
            n * iw,
            n * ow,
            inputs.len(),
            outputs.len()
        )));
    }
    Ok((iw, ow))
}

/// Checks that a mirror chain still corresponds to `topology`.
pub(crate) fn check_shape<N: ComputeNeurons, S: ComputeSynapses>(
    chain: &Chain<N, S>,
    topology: &net::Network,
) -> Result<()> {
    if chain.is_empty() {
        return Err(Error::not_initialized("network is not initialized"));
    }
    let host = topology.chain();
    let same = chain.same_shape(host)
        && chain
            .neurons()
            .zip(host.neurons())
            .all(|(m, h)| m.count() == h.count())
        && chain
            .synapses()
            .zip(host.synapses())
            .all(|(m, h)| m.has_bias() == h.has_bias());
    if same {
        Ok(())
    } else {
        Err(Error::invalid_arg("topology does not match the mirrored network"))
    }
}

/// Pushes every selected node of `topology` into `chain`.
pub(crate) fn sync_nodes_to_ce<N: ComputeNeurons, S: ComputeSynapses>(
    chain: &mut Chain<N, S>,
    topology: &net::Network,
    sync: SyncType,
) -> Result<()> {
    check_shape(chain, topology)?;
    let host = topology.chain();
    if sync.contains(SyncType::NEURONS) {
        for (m, h) in chain.neurons_mut().zip(host.neurons()) {
            m.sync_to_ce(h)?;
        }
    }
    if sync.contains(SyncType::SYNAPSES) {
        for (m, h) in chain.synapses_mut().zip(host.synapses()) {
            m.sync_to_ce(h)?;
        }
    }
    Ok(())
}

/// Pulls every selected node of `chain` back into `topology`.
pub(crate) fn sync_nodes_from_ce<N: ComputeNeurons, S: ComputeSynapses>(
    chain: &Chain<N, S>,
    topology: &mut net::Network,
    sync: SyncType,
) -> Result<()> {
    check_shape(chain, topology)?;
    let host = topology.chain_mut();
    if sync.contains(SyncType::NEURONS) {
        for (m, h) in chain.neurons().zip(host.neurons_mut()) {
            m.sync_from_ce(h)?;
        }
    }
    if sync.contains(SyncType::SYNAPSES) {
        for (m, h) in chain.synapses().zip(host.synapses_mut()) {
            m.sync_from_ce(h)?;
        }
    }
    Ok(())
}
