//! Index-addressed layer chain.
//!
//! Both the topology and every backend mirror are stored as a [`Chain`]:
//! neuron groups live in one vector, synapse edges in another, and
//! synapses `i` always joins neurons `i` to neurons `i + 1`. Adjacency is
//! therefore implied by the indices, so a chain cannot hold a dangling link
//! and dropping it releases every node at once.
//!
//! ```text
//!  neurons[0] ──synapses[0]──▶ neurons[1] ──synapses[1]──▶ neurons[2]
//!    input                       hidden                       output
//! ```

use crate::error::{Error, Result};
use core::ops::{Index, IndexMut};

/// Position of a neuron group within a [`Chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NeuronsId(usize);

impl NeuronsId {
    /// Zero-based layer position, the input layer being `0`.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Position of a synapse edge within a [`Chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SynapsesId(usize);

impl SynapsesId {
    /// Zero-based edge position, the edge leaving the input layer being `0`.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Alternating chain of neuron groups (`N`) and synapse edges (`S`),
/// starting and ending with a neuron group.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain<N, S> {
    neurons: Vec<N>,
    synapses: Vec<S>,
}

impl<N, S> Default for Chain<N, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, S> Chain<N, S> {
    /// Creates an empty chain.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            neurons: Vec::new(),
            synapses: Vec::new(),
        }
    }

    /// Returns `true` when the chain holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.synapses.clear();
        self.neurons.clear();
    }

    /// Starts a new chain with `neurons` as its input layer, discarding any
    /// existing nodes.
    pub fn push_input(&mut self, neurons: N) -> NeuronsId {
        self.clear();
        self.neurons.push(neurons);
        NeuronsId(0)
    }

    /// Appends an edge and the neuron group it feeds.
    ///
    /// # Errors
    /// - `NotInitialized` if the chain has no input layer yet.
    pub fn push_layer(&mut self, synapses: S, neurons: N) -> Result<SynapsesId> {
        if self.neurons.is_empty() {
            return Err(Error::not_initialized("chain has no input layer"));
        }
        self.synapses.push(synapses);
        self.neurons.push(neurons);
        Ok(SynapsesId(self.synapses.len() - 1))
    }

    /// Number of edges, which is also the number of non-input layers.
    #[must_use]
    pub fn layers_count(&self) -> usize {
        self.synapses.len()
    }

    /// The input layer, if any.
    #[must_use]
    pub fn input(&self) -> Option<NeuronsId> {
        (!self.neurons.is_empty()).then_some(NeuronsId(0))
    }

    /// The output layer, if any.
    #[must_use]
    pub fn output(&self) -> Option<NeuronsId> {
        self.neurons.len().checked_sub(1).map(NeuronsId)
    }

    /// Edge feeding `id`; `None` at the input layer.
    #[must_use]
    pub fn prev_synapses(&self, id: NeuronsId) -> Option<SynapsesId> {
        if id.0 >= self.neurons.len() {
            return None;
        }
        id.0.checked_sub(1).map(SynapsesId)
    }

    /// Edge leaving `id`; `None` at the output layer.
    #[must_use]
    pub fn next_synapses(&self, id: NeuronsId) -> Option<SynapsesId> {
        (id.0 < self.synapses.len()).then_some(SynapsesId(id.0))
    }

    /// Neuron group an edge reads from.
    #[must_use]
    pub const fn prev_neurons(id: SynapsesId) -> NeuronsId {
        NeuronsId(id.0)
    }

    /// Neuron group an edge writes to.
    #[must_use]
    pub const fn next_neurons(id: SynapsesId) -> NeuronsId {
        NeuronsId(id.0 + 1)
    }

    /// Returns `true` if `id` is the first edge of the chain.
    #[must_use]
    pub const fn is_first_edge(&self, id: SynapsesId) -> bool {
        id.0 == 0
    }

    /// Returns `true` if `id` is the last edge of the chain.
    #[must_use]
    pub fn is_last_edge(&self, id: SynapsesId) -> bool {
        id.0 + 1 == self.synapses.len()
    }

    /// Edges in input-to-output order.
    pub fn edges(&self) -> impl ExactSizeIterator<Item = SynapsesId> + use<N, S> {
        (0..self.synapses.len()).map(SynapsesId)
    }

    /// Looks up a neuron group.
    #[must_use]
    pub fn get_neurons(&self, id: NeuronsId) -> Option<&N> {
        self.neurons.get(id.0)
    }

    /// Looks up a synapse edge.
    #[must_use]
    pub fn get_synapses(&self, id: SynapsesId) -> Option<&S> {
        self.synapses.get(id.0)
    }

    /// Neuron groups in input-to-output order.
    pub fn neurons(&self) -> core::slice::Iter<'_, N> {
        self.neurons.iter()
    }

    /// Mutable neuron groups in input-to-output order.
    pub fn neurons_mut(&mut self) -> core::slice::IterMut<'_, N> {
        self.neurons.iter_mut()
    }

    /// Synapse edges in input-to-output order.
    pub fn synapses(&self) -> core::slice::Iter<'_, S> {
        self.synapses.iter()
    }

    /// Mutable synapse edges in input-to-output order.
    pub fn synapses_mut(&mut self) -> core::slice::IterMut<'_, S> {
        self.synapses.iter_mut()
    }

    /// Splits the chain around one edge: its source group, the edge itself
    /// and its mutable destination group.
    ///
    /// # Panics
    /// Panics if `id` does not belong to this chain.
    pub fn edge_mut(&mut self, id: SynapsesId) -> (&N, &S, &mut N) {
        let (head, tail) = self.neurons.split_at_mut(id.0 + 1);
        (&head[id.0], &self.synapses[id.0], &mut tail[0])
    }

    /// Builds a chain with the same shape as `source`, converting every node.
    ///
    /// Nodes are converted input first, then edge and destination group
    /// pairs in order. The first failure aborts the build and drops every
    /// node converted so far.
    ///
    /// # Errors
    /// Returns the first conversion error.
    pub fn try_mirror<A, B, E>(
        source: &Chain<A, B>,
        mut neurons: impl FnMut(&A) -> core::result::Result<N, E>,
        mut synapses: impl FnMut(&B) -> core::result::Result<S, E>,
    ) -> core::result::Result<Self, E> {
        let mut chain = Self {
            neurons: Vec::with_capacity(source.neurons.len()),
            synapses: Vec::with_capacity(source.synapses.len()),
        };
        let mut nodes = source.neurons.iter();
        if let Some(input) = nodes.next() {
            chain.neurons.push(neurons(input)?);
        }
        for (edge, group) in source.synapses.iter().zip(nodes) {
            chain.synapses.push(synapses(edge)?);
            chain.neurons.push(neurons(group)?);
        }
        Ok(chain)
    }

    /// Returns `true` if both chains have the same number of nodes.
    #[must_use]
    pub fn same_shape<A, B>(&self, other: &Chain<A, B>) -> bool {
        self.neurons.len() == other.neurons.len() && self.synapses.len() == other.synapses.len()
    }
}

impl<N, S> Index<NeuronsId> for Chain<N, S> {
    type Output = N;

    fn index(&self, id: NeuronsId) -> &N {
        &self.neurons[id.0]
    }
}

impl<N, S> IndexMut<NeuronsId> for Chain<N, S> {
    fn index_mut(&mut self, id: NeuronsId) -> &mut N {
        &mut self.neurons[id.0]
    }
}

impl<N, S> Index<SynapsesId> for Chain<N, S> {
    type Output = S;

    fn index(&self, id: SynapsesId) -> &S {
        &self.synapses[id.0]
    }
}

impl<N, S> IndexMut<SynapsesId> for Chain<N, S> {
    fn index_mut(&mut self, id: SynapsesId) -> &mut S {
        &mut self.synapses[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Chain<u32, &'static str> {
        let mut chain = Chain::new();
        chain.push_input(2);
        chain.push_layer("a", 4).unwrap();
        chain.push_layer("b", 1).unwrap();
        chain
    }

    #[test]
    fn adjacency_follows_indices() {
        let chain = sample();
        let input = chain.input().unwrap();
        let output = chain.output().unwrap();
        assert_eq!(chain.prev_synapses(input), None);
        assert_eq!(chain.next_synapses(output), None);

        let first = chain.next_synapses(input).unwrap();
        assert_eq!(chain[first], "a");
        assert_eq!(chain[Chain::<u32, &str>::next_neurons(first)], 4);
        assert!(chain.is_first_edge(first));

        let last = chain.prev_synapses(output).unwrap();
        assert!(chain.is_last_edge(last));
        assert_eq!(chain[Chain::<u32, &str>::prev_neurons(last)], 4);
        assert_eq!(chain.layers_count(), 2);
    }

    #[test]
    fn push_layer_requires_input() {
        let mut chain: Chain<u32, u32> = Chain::new();
        assert!(chain.push_layer(1, 1).is_err());
        assert!(chain.output().is_none());
    }

    #[test]
    fn mirror_aborts_on_first_failure() {
        let chain = sample();
        let mut seen = 0;
        let mirrored: core::result::Result<Chain<u32, String>, &str> = Chain::try_mirror(
            &chain,
            |n| {
                seen += 1;
                if *n == 1 { Err("boom") } else { Ok(*n * 10) }
            },
            |s| Ok(s.to_uppercase()),
        );
        assert_eq!(mirrored.unwrap_err(), "boom");
        assert_eq!(seen, 3);

        let ok: core::result::Result<Chain<u32, String>, &str> =
            Chain::try_mirror(&chain, |n| Ok(*n), |s| Ok(s.to_string()));
        let ok = ok.unwrap();
        assert!(ok.same_shape(&chain));
    }

    #[test]
    fn edge_mut_splits_source_and_destination() {
        let mut chain = sample();
        let edge = chain.edges().nth(1).unwrap();
        let (src, syn, dst) = chain.edge_mut(edge);
        assert_eq!((*src, *syn), (4, "b"));
        *dst = 7;
        assert_eq!(chain[chain.output().unwrap()], 7);
    }
}
