use super::zeroed;
use crate::error::Result;

/// Dense edge between two neuron groups.
///
/// Weights are row-major with `prev_count` rows and `next_count` columns,
/// so the weight from source `k` to destination `j` sits at
/// `k * next_count + j`.
#[derive(Debug, Clone, PartialEq)]
pub struct Synapses {
    prev_count: u32,
    next_count: u32,
    weights: Vec<f32>,
    biases: Vec<f32>,
    bias: Option<f32>,
}

impl Synapses {
    /// Allocates zeroed weights, and zeroed biases when `bias` is set.
    ///
    /// # Errors
    /// - `MemAllocFailed` if the weight matrix or bias vector cannot be
    ///   allocated.
    pub fn new(prev_count: u32, next_count: u32, bias: Option<f32>) -> Result<Self> {
        let weights = zeroed(prev_count as usize * next_count as usize)?;
        let biases = if bias.is_some() {
            zeroed(next_count as usize)?
        } else {
            Vec::new()
        };
        Ok(Self {
            prev_count,
            next_count,
            weights,
            biases,
            bias,
        })
    }

    /// Width of the source group.
    #[must_use]
    pub const fn prev_count(&self) -> u32 {
        self.prev_count
    }

    /// Width of the destination group.
    #[must_use]
    pub const fn next_count(&self) -> u32 {
        self.next_count
    }

    /// Weight matrix.
    #[must_use]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Mutable weight matrix.
    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    /// `prev_count * next_count`.
    #[must_use]
    pub fn weights_count(&self) -> usize {
        self.weights.len()
    }

    /// Bias vector; empty without bias.
    #[must_use]
    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    /// Mutable bias vector.
    pub fn biases_mut(&mut self) -> &mut [f32] {
        &mut self.biases
    }

    /// `next_count` with bias, `0` without.
    #[must_use]
    pub fn biases_count(&self) -> usize {
        self.biases.len()
    }

    /// Whether a bias term is added.
    #[must_use]
    pub const fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Scalar applied to every bias; `0.0` without bias.
    #[must_use]
    pub fn bias_multiplier(&self) -> f32 {
        self.bias.unwrap_or(0.0)
    }

    /// Bytes held by this edge.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        size_of::<Self>() + (self.weights.len() + self.biases.len()) * size_of::<f32>()
    }
}
