//! Binary persistence of topologies and weights.
//!
//! Two related file kinds are used, both little-endian with fixed-width
//! integers: a *neurons* file that describes the layer shapes, and a
//! *synapses* file that carries the trained weights for an already
//! initialized network.
//!
//! # Neurons file
//!
//! ```text
//! ┌────────────────┬──────────────┬───────────────────────────┐
//! │ Header         │ Counts       │ Layer N …                 │
//! ├────────────────┼──────────────┼───────────────────────────┤
//! │ u32 0x444E324E │ u32 inputs   │ u32 neurons               │
//! │ u32 version 1  │ u32 layers   │ u8  activation (6 / 8)    │
//! │ u32 reserved   │              │ u8  bias (0 / 1)          │
//! └────────────────┴──────────────┴───────────────────────────┘
//! ```
//!
//! Only two activations have an on-disk code: `6` is RELU and `8` is
//! Sigmoid. Any other activation is written as `0`, which the loader
//! rejects. A loaded bias always has multiplier `1.0`.
//!
//! # Synapses file
//!
//! ```text
//! ┌────────────────┬──────────────┬───────────────────────────────────┐
//! │ Header         │ Count        │ Layer N …                         │
//! ├────────────────┼──────────────┼───────────────────────────────────┤
//! │ u32 0x4453324E │ u32 layers   │ u8  bias (0 / 1)                  │
//! │ u32 version 1  │              │ u32 prev, u32 next                │
//! │ u32 reserved   │              │ [f32; prev * next] weights        │
//! │                │              │ if bias: u32 next, [f32; next]    │
//! └────────────────┴──────────────┴───────────────────────────────────┘
//! ```
//!
//! Every count is checked against the live topology. The reserved word is
//! written as zero and never validated.
//!
//! # Errors
//!
//! | Failure | Kind |
//! |---|---|
//! | file cannot be opened, bad magic or version | `OpenFailed` |
//! | file cannot be created | `CreateFailed` |
//! | short or failed read | `ReadFailed` |
//! | short or failed write | `WriteFailed` |
//! | count or code mismatch | `InvalidArg` |
//!
//! # Example
//!
//! ```rust,no_run
//! use briny_infer::net::{format, Network};
//!
//! let mut net = Network::new();
//! format::load_neurons(&mut net, "xor.neurons")?;
//! format::load_synapses(&mut net, "xor.synapses")?;
//! format::save_synapses(&net, "xor-copy.synapses")?;
//! # Ok::<(), briny_infer::Error>(())
//! ```

use super::{Activation, Layer, MAX_LAYERS, MAX_NEURONS, Network};
use crate::error::{Error, ErrorKind, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Magic word of a neurons file.
pub const NEURONS_MAGIC: u32 = 0x444E_324E;
/// Supported neurons file version.
pub const NEURONS_VERSION: u32 = 1;
/// Magic word of a synapses file.
pub const SYNAPSES_MAGIC: u32 = 0x4453_324E;
/// Supported synapses file version.
pub const SYNAPSES_VERSION: u32 = 1;

const CODE_RELU: u8 = 6;
const CODE_SIGMOID: u8 = 8;

fn read_bytes<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf)
        .map_err(|e| Error::new(ErrorKind::ReadFailed, format!("failed to read: {e}")))
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_bytes(r, &mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_bytes(r, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32s<R: Read>(r: &mut R, out: &mut [f32]) -> Result<()> {
    let mut buf = vec![0u8; out.len() * 4];
    read_bytes(r, &mut buf)?;
    for (v, chunk) in out.iter_mut().zip(buf.chunks_exact(4)) {
        *v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(())
}

fn write_bytes<W: Write>(w: &mut W, buf: &[u8]) -> Result<()> {
    w.write_all(buf)
        .map_err(|e| Error::new(ErrorKind::WriteFailed, format!("failed to write: {e}")))
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    write_bytes(w, &v.to_le_bytes())
}

fn write_f32s<W: Write>(w: &mut W, values: &[f32]) -> Result<()> {
    let buf: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    write_bytes(w, &buf)
}

fn read_header<R: Read>(r: &mut R, magic: u32, version: u32) -> Result<()> {
    let found = read_u32(r)?;
    if found != magic {
        return Err(Error::new(
            ErrorKind::OpenFailed,
            format!("invalid magic {found:#010x}"),
        ));
    }
    let found = read_u32(r)?;
    if found != version {
        return Err(Error::new(
            ErrorKind::OpenFailed,
            format!("invalid version {found}"),
        ));
    }
    read_u32(r)?; // reserved
    Ok(())
}

fn write_header<W: Write>(w: &mut W, magic: u32, version: u32) -> Result<()> {
    write_u32(w, magic)?;
    write_u32(w, version)?;
    write_u32(w, 0)
}

fn read_bias_flag<R: Read>(r: &mut R) -> Result<bool> {
    match read_u8(r)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::invalid_arg(format!("invalid bias flag {other}"))),
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path).map(BufReader::new).map_err(|e| {
        Error::new(
            ErrorKind::OpenFailed,
            format!("failed to open '{}': {e}", path.display()),
        )
    })
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    File::create(path).map(BufWriter::new).map_err(|e| {
        Error::new(
            ErrorKind::CreateFailed,
            format!("failed to create '{}': {e}", path.display()),
        )
    })
}

fn flush<W: Write>(w: &mut W) -> Result<()> {
    w.flush()
        .map_err(|e| Error::new(ErrorKind::WriteFailed, format!("failed to flush: {e}")))
}

fn ensure_ok(network: &Network) -> Result<()> {
    if network.is_ok() {
        Ok(())
    } else {
        Err(Error::invalid_arg("network is not initialized"))
    }
}

/// Reads a neurons description and initializes `network` from it.
///
/// # Errors
/// See the [module table](self).
pub fn read_neurons<R: Read>(network: &mut Network, r: &mut R) -> Result<()> {
    read_header(r, NEURONS_MAGIC, NEURONS_VERSION)?;
    let inputs = read_u32(r)?;
    let count = read_u32(r)?;
    if count > MAX_LAYERS {
        return Err(Error::invalid_arg(format!("invalid layers count {count}")));
    }

    let mut layers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let neurons = read_u32(r)?;
        if neurons > MAX_NEURONS {
            return Err(Error::invalid_arg(format!("invalid neurons count {neurons}")));
        }
        let activation = match read_u8(r)? {
            CODE_RELU => Activation::Relu,
            CODE_SIGMOID => Activation::Sigmoid,
            other => return Err(Error::invalid_arg(format!("invalid activation {other}"))),
        };
        let mut layer = Layer::new(neurons, activation);
        if read_bias_flag(r)? {
            layer = layer.with_bias(1.0);
        }
        layers.push(layer);
    }
    network.init(inputs, &layers)
}

/// Writes the layer shapes of `network`.
///
/// # Errors
/// See the [module table](self).
pub fn write_neurons<W: Write>(network: &Network, w: &mut W) -> Result<()> {
    ensure_ok(network)?;
    let chain = network.chain();
    write_header(w, NEURONS_MAGIC, NEURONS_VERSION)?;
    write_u32(w, chain.neurons().next().map_or(0, super::Neurons::count))?;
    write_u32(w, network.layers_count())?;
    for (edge, neurons) in chain.synapses().zip(chain.neurons().skip(1)) {
        write_u32(w, neurons.count())?;
        let code = match neurons.activation() {
            Activation::Relu => CODE_RELU,
            Activation::Sigmoid => CODE_SIGMOID,
            _ => 0,
        };
        write_bytes(w, &[code, u8::from(edge.has_bias())])?;
    }
    flush(w)
}

/// Reads trained weights into an initialized `network`.
///
/// # Errors
/// See the [module table](self). `InvalidArg` also when `network` is not
/// initialized.
pub fn read_synapses<R: Read>(network: &mut Network, r: &mut R) -> Result<()> {
    ensure_ok(network)?;
    read_header(r, SYNAPSES_MAGIC, SYNAPSES_VERSION)?;
    let count = read_u32(r)?;
    if count != network.layers_count() {
        return Err(Error::invalid_arg(format!("invalid layers count {count}")));
    }

    let edges: Vec<_> = network.chain().edges().collect();
    for id in edges {
        let Some(edge) = network.synapses_mut(id) else {
            break;
        };
        let has_bias = read_bias_flag(r)?;
        let prev = read_u32(r)?;
        if prev != edge.prev_count() {
            return Err(Error::invalid_arg(format!("invalid prev neurons count {prev}")));
        }
        let next = read_u32(r)?;
        if next != edge.next_count() {
            return Err(Error::invalid_arg(format!("invalid next neurons count {next}")));
        }
        read_f32s(r, edge.weights_mut())?;
        if has_bias {
            let biases = read_u32(r)?;
            if biases as usize != edge.biases_count() {
                return Err(Error::invalid_arg(format!("invalid biases count {biases}")));
            }
            read_f32s(r, edge.biases_mut())?;
        }
    }
    Ok(())
}

/// Writes the weights and biases of `network`.
///
/// # Errors
/// See the [module table](self).
pub fn write_synapses<W: Write>(network: &Network, w: &mut W) -> Result<()> {
    ensure_ok(network)?;
    write_header(w, SYNAPSES_MAGIC, SYNAPSES_VERSION)?;
    write_u32(w, network.layers_count())?;
    for edge in network.chain().synapses() {
        write_bytes(w, &[u8::from(edge.has_bias())])?;
        write_u32(w, edge.prev_count())?;
        write_u32(w, edge.next_count())?;
        write_f32s(w, edge.weights())?;
        if edge.has_bias() {
            write_u32(w, edge.next_count())?;
            write_f32s(w, edge.biases())?;
        }
    }
    flush(w)
}

/// Loads a neurons file from `path` and initializes `network`.
///
/// # Errors
/// See the [module table](self).
pub fn load_neurons(network: &mut Network, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    read_neurons(network, &mut open(path)?)?;
    debug!(path = %path.display(), layers = network.layers_count(), "neurons loaded");
    Ok(())
}

/// Saves the layer shapes of `network` to `path`.
///
/// # Errors
/// See the [module table](self).
pub fn save_neurons(network: &Network, path: impl AsRef<Path>) -> Result<()> {
    ensure_ok(network)?;
    let path = path.as_ref();
    write_neurons(network, &mut create(path)?)?;
    debug!(path = %path.display(), "neurons saved");
    Ok(())
}

/// Loads a synapses file from `path` into `network`.
///
/// # Errors
/// See the [module table](self).
pub fn load_synapses(network: &mut Network, path: impl AsRef<Path>) -> Result<()> {
    ensure_ok(network)?;
    let path = path.as_ref();
    read_synapses(network, &mut open(path)?)?;
    debug!(path = %path.display(), "synapses loaded");
    Ok(())
}

/// Saves the weights and biases of `network` to `path`.
///
/// # Errors
/// See the [module table](self).
pub fn save_synapses(network: &Network, path: impl AsRef<Path>) -> Result<()> {
    ensure_ok(network)?;
    let path = path.as_ref();
    write_synapses(network, &mut create(path)?)?;
    debug!(path = %path.display(), "synapses saved");
    Ok(())
}
