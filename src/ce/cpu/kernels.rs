//! Edge kernels over plain slices.
//!
//! These are the reference semantics for one layer boundary. The other
//! backends split the same loops across threads or shader invocations.

use crate::net::activation::{Activation, ActivationArgs, activate_in_place};

/// Dot product of `src` with column `j` of a row-major `src.len() × next`
/// weight matrix, summed in increasing row order.
#[inline]
#[must_use]
pub fn column_dot(src: &[f32], weights: &[f32], next: usize, j: usize) -> f32 {
    src.iter()
        .enumerate()
        .fold(0.0, |acc, (k, &x)| acc + x * weights[k * next + j])
}

/// Computes `dst = src × W`.
///
/// # Panics
///
/// - If `weights.len() != src.len() * dst.len()`.
pub fn compute(src: &[f32], weights: &[f32], dst: &mut [f32]) {
    assert_eq!(weights.len(), src.len() * dst.len(), "weight shape mismatch");
    let next = dst.len();
    for (j, out) in dst.iter_mut().enumerate() {
        *out = column_dot(src, weights, next, j);
    }
}

/// Computes `dst = src × W + multiplier · b`.
///
/// # Panics
///
/// - If `weights.len() != src.len() * dst.len()` or `biases.len() != dst.len()`.
pub fn compute_with_bias(
    src: &[f32],
    weights: &[f32],
    biases: &[f32],
    multiplier: f32,
    dst: &mut [f32],
) {
    assert_eq!(weights.len(), src.len() * dst.len(), "weight shape mismatch");
    assert_eq!(biases.len(), dst.len(), "bias shape mismatch");
    let next = dst.len();
    for (j, out) in dst.iter_mut().enumerate() {
        *out = column_dot(src, weights, next, j) + multiplier * biases[j];
    }
}

/// Applies the destination layer's activation in place.
pub fn activate(dst: &mut [f32], activation: Activation, args: &ActivationArgs) {
    activate_in_place(dst, activation, args);
}
