//! Shared `f32` storage for pool kernels.
//!
//! Workers write disjoint items of the same buffer concurrently. Each slot
//! is an `AtomicU32` holding the float's bits, accessed with `Relaxed`
//! ordering; the pool's completion latch orders a dispatch's writes before
//! the caller (or the next dispatch) reads them.

use std::sync::atomic::{AtomicU32, Ordering};

/// Fixed-length array of `f32` slots shareable across workers.
pub struct FloatCells(Box<[AtomicU32]>);

impl FloatCells {
    /// `len` slots set to `0.0`.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self((0..len).map(|_| AtomicU32::new(0)).collect())
    }

    /// Slots initialized from `values`.
    #[must_use]
    pub fn from_slice(values: &[f32]) -> Self {
        Self(values.iter().map(|v| AtomicU32::new(v.to_bits())).collect())
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads slot `i`.
    #[inline]
    #[must_use]
    pub fn get(&self, i: usize) -> f32 {
        f32::from_bits(self.0[i].load(Ordering::Relaxed))
    }

    /// Writes slot `i`.
    #[inline]
    pub fn set(&self, i: usize, value: f32) {
        self.0[i].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Overwrites the slots starting at `offset` with `values`.
    pub fn store_from(&self, offset: usize, values: &[f32]) {
        for (cell, v) in self.0[offset..offset + values.len()].iter().zip(values) {
            cell.store(v.to_bits(), Ordering::Relaxed);
        }
    }

    /// Copies the slots starting at `offset` into `out`.
    pub fn load_into(&self, offset: usize, out: &mut [f32]) {
        let len = out.len();
        for (v, cell) in out.iter_mut().zip(&self.0[offset..offset + len]) {
            *v = f32::from_bits(cell.load(Ordering::Relaxed));
        }
    }

    /// Snapshot of every slot.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.0
            .iter()
            .map(|c| f32::from_bits(c.load(Ordering::Relaxed)))
            .collect()
    }
}

impl core::fmt::Debug for FloatCells {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}
