//! briny_infer: feed-forward neural-network inference in Rust.
//!
//! A network topology is described once, on the host, and then mirrored
//! onto one of several interchangeable compute engines that run forward
//! evaluation over batches of input vectors.
//!
//! # Features
//!
//! - Backend-independent topology model with weights, biases and 21
//!   activation functions.
//! - Three compute engines behind one contract: a single-threaded
//!   reference, a fixed worker pool with N-dimensional range partitioning,
//!   and WGPU compute shaders (feature `wgpu`).
//! - Explicit host ↔ engine synchronization of neuron values and weights.
//! - Binary persistence of layer layouts and trained weights.
//!
//! Training is out of scope; weights come from elsewhere.
//!
//! # Modules
//!
//! - [`net`]: topology model, activations and file formats.
//! - [`ce`]: compute-engine contract and the backends.
//! - [`graph`]: the arena chain both sides are built on.
//! - [`backend`]: backend tags.
//! - [`error`]: crate error type.
//!
//! # Example
//!
//! ```rust
//! use briny_infer::ce::{ComputeNetwork, Provider, SyncType};
//! use briny_infer::ce::cpu::CpuProvider;
//! use briny_infer::net::{Activation, Layer, Network, SynapsesData};
//!
//! let mut topology = Network::new();
//! topology.init(2, &[
//!     Layer::new(2, Activation::Identity),
//!     Layer::new(1, Activation::Identity).with_bias(1.0),
//! ])?;
//! topology.load_weights_and_biases(&[
//!     SynapsesData::new(vec![1.0, 0.0, 0.0, 1.0], vec![]),
//!     SynapsesData::new(vec![2.0, 3.0], vec![0.5]),
//! ])?;
//!
//! let mut provider = CpuProvider::new();
//! provider.init(None)?;
//! let mut network = provider.create_network()?;
//! network.init(&topology)?;
//!
//! let mut out = [0.0; 2];
//! network.evaluate(2, &[1.0, 1.0, 0.0, 2.0], &mut out)?;
//! assert_eq!(out, [5.5, 6.5]);
//!
//! network.sync_from_ce(&mut topology, true, SyncType::NEURONS)?;
//! # Ok::<(), briny_infer::Error>(())
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::type_complexity,
    clippy::many_single_char_names,
    clippy::cast_possible_truncation,
    clippy::similar_names,
    clippy::cast_precision_loss,
    clippy::unused_async,
    clippy::unnecessary_cast
)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod ce;
pub mod error;
pub mod graph;
pub mod net;

pub use backend::Backend;
pub use error::{Error, ErrorKind, Result};
