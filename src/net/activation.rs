//! Activation functions.
//!
//! Each neuron group applies one [`Activation`] element-wise after its
//! incoming edge has been computed. The scalar formulas here are the
//! reference every backend reproduces; the GPU shader mirrors them line
//! for line.
//!
//! | Name | Formula |
//! |---|---|
//! | Identity | `x` |
//! | Sigmoid | `1 / (1 + e^-x)` |
//! | BinaryStep | `0` if `x < 0` else `1` |
//! | TanH | `tanh(x)` |
//! | ArcTan | `atan(x)` |
//! | SoftSign | `x / (1 + |x|)` |
//! | RELU | `max(0, x)` |
//! | LeakyRELU | `0.01 x` |
//! | SoftPlus | `ln(1 + x)` |
//! | BentIdentity | `(sqrt(x² + 1) - 1) / 2 + x` |
//! | Sinusoid | `sin(x)` |
//! | SINC | `1` if `x == 0` else `sin(x) / x` |
//! | Gaussian | `e^(-x²)` |
//! | ISRU | `x / sqrt(1 + αx²)` |
//! | PRELU | `αx` if `x < 0` else `x` |
//! | ELU | `α(e^x - 1)` if `x < 0` else `x` |
//! | SELU | `λα(e^x - 1)` if `x < 0` else `λx` |
//! | SRELU | `Tl + Al(x - Tl)` if `x <= Tl`, `Tr + Ar(x - Tr)` if `x >= Tr`, else `x` |
//! | ISRLU | `x / sqrt(1 + αx²)` if `x < 0` else `x` |
//! | SoftExponential | piecewise in `α` |
//! | SoftMax | `e^x / Σ e^x` over the layer |
//!
//! `LeakyRELU` is the flat `0.01 x`, not the textbook `max(x, 0.01 x)`.
//! Networks trained against this engine depend on that exact curve.

use crate::error::{Error, Result};
use core::convert::TryFrom;
use core::fmt;

/// Maximum number of parameters an activation can carry.
pub const MAX_ACTIVATION_ARGS: usize = 10;

/// Activation function attached to a neuron group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum Activation {
    #[default]
    Identity = 1,
    Sigmoid = 2,
    BinaryStep = 3,
    TanH = 4,
    ArcTan = 5,
    SoftSign = 6,
    Relu = 7,
    LeakyRelu = 8,
    SoftPlus = 9,
    BentIdentity = 10,
    Sinusoid = 11,
    Sinc = 12,
    Gaussian = 13,
    Isru = 14,
    Prelu = 15,
    Elu = 16,
    Selu = 17,
    Srelu = 18,
    Isrlu = 19,
    SoftExponential = 20,
    SoftMax = 21,
}

impl Activation {
    /// Every activation, in code order.
    pub const ALL: [Self; 21] = [
        Self::Identity,
        Self::Sigmoid,
        Self::BinaryStep,
        Self::TanH,
        Self::ArcTan,
        Self::SoftSign,
        Self::Relu,
        Self::LeakyRelu,
        Self::SoftPlus,
        Self::BentIdentity,
        Self::Sinusoid,
        Self::Sinc,
        Self::Gaussian,
        Self::Isru,
        Self::Prelu,
        Self::Elu,
        Self::Selu,
        Self::Srelu,
        Self::Isrlu,
        Self::SoftExponential,
        Self::SoftMax,
    ];

    /// Numeric code of the activation.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Number of parameters the formula reads.
    #[must_use]
    pub const fn required_args(self) -> usize {
        match self {
            Self::Isru | Self::Prelu | Self::Elu | Self::Isrlu | Self::SoftExponential => 1,
            Self::Selu => 2,
            Self::Srelu => 4,
            _ => 0,
        }
    }

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Identity => "Identity",
            Self::Sigmoid => "Sigmoid",
            Self::BinaryStep => "BinaryStep",
            Self::TanH => "TanH",
            Self::ArcTan => "ArcTan",
            Self::SoftSign => "SoftSign",
            Self::Relu => "RELU",
            Self::LeakyRelu => "LeakyRELU",
            Self::SoftPlus => "SoftPlus",
            Self::BentIdentity => "BentIdentity",
            Self::Sinusoid => "Sinusoid",
            Self::Sinc => "SINC",
            Self::Gaussian => "Gaussian",
            Self::Isru => "ISRU",
            Self::Prelu => "PRELU",
            Self::Elu => "ELU",
            Self::Selu => "SELU",
            Self::Srelu => "SRELU",
            Self::Isrlu => "ISRLU",
            Self::SoftExponential => "SoftExponential",
            Self::SoftMax => "SoftMax",
        }
    }

    /// Applies the formula to one value.
    ///
    /// `exp_sum` is only read by [`Activation::SoftMax`] and must be the
    /// [`exp_sum`] of the whole layer before activation.
    #[must_use]
    pub fn apply(self, x: f32, args: &ActivationArgs, exp_sum: f32) -> f32 {
        let a = args.get(0);
        match self {
            Self::Identity => x,
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::BinaryStep => {
                if x < 0.0 {
                    0.0
                } else {
                    1.0
                }
            }
            Self::TanH => x.tanh(),
            Self::ArcTan => x.atan(),
            Self::SoftSign => x / (1.0 + x.abs()),
            Self::Relu => x.max(0.0),
            Self::LeakyRelu => 0.01 * x,
            Self::SoftPlus => (1.0 + x).ln(),
            Self::BentIdentity => ((x * x + 1.0).sqrt() - 1.0) / 2.0 + x,
            Self::Sinusoid => x.sin(),
            Self::Sinc => {
                if x == 0.0 {
                    1.0
                } else {
                    x.sin() / x
                }
            }
            Self::Gaussian => (-x * x).exp(),
            Self::Isru => x / (1.0 + a * x * x).sqrt(),
            Self::Prelu => {
                if x < 0.0 {
                    a * x
                } else {
                    x
                }
            }
            Self::Elu => {
                if x < 0.0 {
                    a * (x.exp() - 1.0)
                } else {
                    x
                }
            }
            Self::Selu => {
                let lambda = args.get(1);
                if x < 0.0 {
                    lambda * a * (x.exp() - 1.0)
                } else {
                    lambda * x
                }
            }
            Self::Srelu => {
                let (tl, al, tr, ar) = (a, args.get(1), args.get(2), args.get(3));
                if x <= tl {
                    tl + al * (x - tl)
                } else if x >= tr {
                    tr + ar * (x - tr)
                } else {
                    x
                }
            }
            Self::Isrlu => {
                if x < 0.0 {
                    x / (1.0 + a * x * x).sqrt()
                } else {
                    x
                }
            }
            Self::SoftExponential => {
                if a < 0.0 {
                    -(1.0 - a * (x + a)).ln() / a
                } else if a > 0.0 {
                    ((a * x).exp() - 1.0) / a + a
                } else {
                    x
                }
            }
            Self::SoftMax => x.exp() / exp_sum,
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u16> for Activation {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        code.checked_sub(1)
            .and_then(|i| Self::ALL.get(usize::from(i)).copied())
            .ok_or_else(|| Error::invalid_arg(format!("unknown activation code {code}")))
    }
}

/// Fixed-capacity parameter list of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActivationArgs {
    values: [f32; MAX_ACTIVATION_ARGS],
    len: usize,
}

impl ActivationArgs {
    /// Copies up to [`MAX_ACTIVATION_ARGS`] parameters.
    ///
    /// # Errors
    /// - `InvalidArg` if `args` is longer than [`MAX_ACTIVATION_ARGS`].
    pub fn new(args: &[f32]) -> Result<Self> {
        if args.len() > MAX_ACTIVATION_ARGS {
            return Err(Error::invalid_arg(format!(
                "{} activation args exceed the limit of {MAX_ACTIVATION_ARGS}",
                args.len()
            )));
        }
        let mut values = [0.0; MAX_ACTIVATION_ARGS];
        values[..args.len()].copy_from_slice(args);
        Ok(Self {
            values,
            len: args.len(),
        })
    }

    /// Number of parameters set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no parameter is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Parameter `i`, or `0.0` past the end.
    #[must_use]
    pub fn get(&self, i: usize) -> f32 {
        if i < self.len { self.values[i] } else { 0.0 }
    }

    /// The parameters that are set.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values[..self.len]
    }

    /// All slots, unused ones zeroed.
    #[must_use]
    pub const fn padded(&self) -> &[f32; MAX_ACTIVATION_ARGS] {
        &self.values
    }
}

/// Sum of `e^x` over `values`, accumulated in index order.
#[must_use]
pub fn exp_sum(values: &[f32]) -> f32 {
    values.iter().map(|v| v.exp()).sum()
}

/// Applies `activation` to a whole layer in place.
///
/// Identity leaves the values untouched. SoftMax runs its reduction first
/// and then normalizes.
pub fn activate_in_place(values: &mut [f32], activation: Activation, args: &ActivationArgs) {
    if activation == Activation::Identity {
        return;
    }
    let sum = if activation == Activation::SoftMax {
        exp_sum(values)
    } else {
        0.0
    };
    for v in values.iter_mut() {
        *v = activation.apply(*v, args, sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn none() -> ActivationArgs {
        ActivationArgs::default()
    }

    #[test]
    fn codes_round_trip() {
        for act in Activation::ALL {
            assert_eq!(Activation::try_from(act.code()).unwrap(), act);
        }
        assert!(Activation::try_from(0).is_err());
        assert!(Activation::try_from(22).is_err());
    }

    #[test]
    fn basic_curves() {
        assert_abs_diff_eq!(Activation::Sigmoid.apply(0.0, &none(), 0.0), 0.5);
        assert_abs_diff_eq!(Activation::Relu.apply(-3.0, &none(), 0.0), 0.0);
        assert_abs_diff_eq!(Activation::Relu.apply(3.0, &none(), 0.0), 3.0);
        assert_abs_diff_eq!(Activation::BinaryStep.apply(-0.1, &none(), 0.0), 0.0);
        assert_abs_diff_eq!(Activation::BinaryStep.apply(0.0, &none(), 0.0), 1.0);
        assert_abs_diff_eq!(Activation::SoftSign.apply(1.0, &none(), 0.0), 0.5);
        assert_abs_diff_eq!(Activation::Sinc.apply(0.0, &none(), 0.0), 1.0);
        assert_abs_diff_eq!(Activation::Gaussian.apply(0.0, &none(), 0.0), 1.0);
        assert_abs_diff_eq!(Activation::BentIdentity.apply(0.0, &none(), 0.0), 0.0);
    }

    #[test]
    fn leaky_relu_is_flat_scale() {
        assert_abs_diff_eq!(Activation::LeakyRelu.apply(2.0, &none(), 0.0), 0.02);
        assert_abs_diff_eq!(Activation::LeakyRelu.apply(-2.0, &none(), 0.0), -0.02);
    }

    #[test]
    fn parameterized_curves() {
        let alpha = ActivationArgs::new(&[0.5]).unwrap();
        assert_abs_diff_eq!(Activation::Prelu.apply(-2.0, &alpha, 0.0), -1.0);
        assert_abs_diff_eq!(Activation::Prelu.apply(2.0, &alpha, 0.0), 2.0);
        assert_abs_diff_eq!(Activation::Isrlu.apply(2.0, &alpha, 0.0), 2.0);
        assert_abs_diff_eq!(
            Activation::Isru.apply(2.0, &alpha, 0.0),
            2.0 / 3.0_f32.sqrt(),
            epsilon = 1e-6
        );

        let selu = ActivationArgs::new(&[1.0, 2.0]).unwrap();
        assert_abs_diff_eq!(Activation::Selu.apply(1.5, &selu, 0.0), 3.0);

        let srelu = ActivationArgs::new(&[-1.0, 0.5, 1.0, 2.0]).unwrap();
        assert_abs_diff_eq!(Activation::Srelu.apply(-3.0, &srelu, 0.0), -2.0);
        assert_abs_diff_eq!(Activation::Srelu.apply(0.25, &srelu, 0.0), 0.25);
        assert_abs_diff_eq!(Activation::Srelu.apply(2.0, &srelu, 0.0), 3.0);

        let zero = ActivationArgs::new(&[0.0]).unwrap();
        assert_abs_diff_eq!(Activation::SoftExponential.apply(1.25, &zero, 0.0), 1.25);
        let pos = ActivationArgs::new(&[1.0]).unwrap();
        assert_abs_diff_eq!(
            Activation::SoftExponential.apply(1.0, &pos, 0.0),
            core::f32::consts::E,
            epsilon = 1e-5
        );
    }

    #[test]
    fn softmax_normalizes_layer() {
        let mut values = [1.0, 2.0, 3.0];
        activate_in_place(&mut values, Activation::SoftMax, &none());
        assert_abs_diff_eq!(values.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert!(values[2] > values[1] && values[1] > values[0]);
    }

    #[test]
    fn args_limit_enforced() {
        assert!(ActivationArgs::new(&[0.0; MAX_ACTIVATION_ARGS]).is_ok());
        assert!(ActivationArgs::new(&[0.0; MAX_ACTIVATION_ARGS + 1]).is_err());
        let args = ActivationArgs::new(&[1.0, 2.0]).unwrap();
        assert_eq!(args.as_slice(), &[1.0, 2.0]);
        assert_abs_diff_eq!(args.get(5), 0.0);
    }
}
