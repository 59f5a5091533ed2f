//! Pool kernels for one layer boundary.
//!
//! Each kernel runs over a one-dimensional space of `next` items, item `j`
//! producing destination neuron `j`. Sums are accumulated in the same
//! order as the single-threaded kernels, so both backends agree bit for
//! bit.

use super::cells::FloatCells;
use super::scheduler::Kernel;
use crate::net::{Activation, ActivationArgs};
use std::sync::Arc;

/// A window into shared cells.
#[derive(Debug, Clone)]
pub struct CellSlice {
    /// Backing storage.
    pub cells: Arc<FloatCells>,
    /// First slot of the window.
    pub offset: usize,
}

impl CellSlice {
    /// Window starting at `offset`.
    #[must_use]
    pub const fn new(cells: Arc<FloatCells>, offset: usize) -> Self {
        Self { cells, offset }
    }

    #[inline]
    fn get(&self, i: usize) -> f32 {
        self.cells.get(self.offset + i)
    }

    #[inline]
    fn set(&self, i: usize, value: f32) {
        self.cells.set(self.offset + i, value);
    }
}

/// `dst[j] = Σ_k src[k] · W[k, j]`.
#[derive(Debug)]
pub struct ComputeKernel {
    /// Source group.
    pub src: CellSlice,
    /// Row-major `prev × next` weights.
    pub weights: Arc<Vec<f32>>,
    /// Destination group.
    pub dst: CellSlice,
    /// Source width.
    pub prev: usize,
    /// Destination width.
    pub next: usize,
}

impl ComputeKernel {
    fn dot(&self, j: usize) -> f32 {
        (0..self.prev).fold(0.0, |acc, k| {
            acc + self.src.get(k) * self.weights[k * self.next + j]
        })
    }
}

impl Kernel for ComputeKernel {
    fn run_item(&self, index: &[u32]) {
        let j = index[0] as usize;
        self.dst.set(j, self.dot(j));
    }
}

/// [`ComputeKernel`] plus `multiplier · b[j]`.
#[derive(Debug)]
pub struct ComputeWithBiasKernel {
    /// The unbiased product.
    pub product: ComputeKernel,
    /// One bias per destination neuron.
    pub biases: Arc<Vec<f32>>,
    /// Scalar applied to every bias.
    pub multiplier: f32,
}

impl Kernel for ComputeWithBiasKernel {
    fn run_item(&self, index: &[u32]) {
        let j = index[0] as usize;
        let value = self.product.dot(j) + self.multiplier * self.biases[j];
        self.product.dst.set(j, value);
    }
}

/// Applies an activation to each destination neuron in place.
#[derive(Debug)]
pub struct ActivateKernel {
    /// Values to transform.
    pub values: CellSlice,
    /// Function to apply.
    pub activation: Activation,
    /// Its parameters.
    pub args: ActivationArgs,
    /// Layer-wide `Σ e^x`, read by SoftMax only.
    pub exp_sum: f32,
}

impl Kernel for ActivateKernel {
    fn run_item(&self, index: &[u32]) {
        let j = index[0] as usize;
        let x = self.values.get(j);
        self.values
            .set(j, self.activation.apply(x, &self.args, self.exp_sum));
    }
}

/// `Σ e^x` over `len` slots of `values`, in index order.
#[must_use]
pub fn exp_sum(values: &CellSlice, len: usize) -> f32 {
    (0..len).map(|i| values.get(i).exp()).sum()
}
