use super::activation::{Activation, ActivationArgs};
use super::{MAX_NEURONS, MIN_NEURONS, zeroed};
use crate::error::{Error, Result};

/// One layer's neuron values plus the activation applied to them.
#[derive(Debug, Clone, PartialEq)]
pub struct Neurons {
    values: Vec<f32>,
    activation: Activation,
    args: ActivationArgs,
}

impl Neurons {
    /// Allocates `count` zeroed neurons.
    ///
    /// # Errors
    /// - `InvalidArg` if `count` is outside `[MIN_NEURONS, MAX_NEURONS]` or
    ///   fewer parameters are given than `activation` reads.
    /// - `MemAllocFailed` if the values cannot be allocated.
    pub fn new(count: u32, activation: Activation, args: &[f32]) -> Result<Self> {
        let args = Self::check(count, activation, args)?;
        Ok(Self {
            values: zeroed(count as usize)?,
            activation,
            args,
        })
    }

    /// Validates a group description without allocating it.
    pub(super) fn check(
        count: u32,
        activation: Activation,
        args: &[f32],
    ) -> Result<ActivationArgs> {
        if !(MIN_NEURONS..=MAX_NEURONS).contains(&count) {
            return Err(Error::invalid_arg(format!(
                "neuron count {count} outside [{MIN_NEURONS}, {MAX_NEURONS}]"
            )));
        }
        let args = ActivationArgs::new(args)?;
        if args.len() < activation.required_args() {
            return Err(Error::invalid_arg(format!(
                "{activation} needs {} args, got {}",
                activation.required_args(),
                args.len()
            )));
        }
        Ok(args)
    }

    /// Number of neurons.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.values.len() as u32
    }

    /// Current neuron values.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Mutable neuron values; set these between evaluations and push them
    /// with a neurons sync.
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Activation applied after the incoming edge.
    #[must_use]
    pub const fn activation(&self) -> Activation {
        self.activation
    }

    /// Activation parameters.
    #[must_use]
    pub const fn activation_args(&self) -> &ActivationArgs {
        &self.args
    }

    /// Bytes held by this group.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        size_of::<Self>() + self.values.len() * size_of::<f32>()
    }
}
