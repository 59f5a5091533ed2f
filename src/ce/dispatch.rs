//! Runtime backend selection.
//!
//! [`AnyProvider`], [`AnyNetwork`] and [`AnyConfig`] wrap the concrete
//! backends in sum types for callers that pick a [`Backend`] at runtime.
//! Handing an object back to a provider of a different backend is caught
//! by comparing tags and reported as `InvalidArg`.
//!
//! # Example
//! ```rust
//! use briny_infer::Backend;
//! use briny_infer::ce::dispatch::AnyProvider;
//! use briny_infer::net::{Activation, Layer, Network};
//!
//! let mut topology = Network::new();
//! topology
//!     .init(2, &[Layer::new(3, Activation::Relu), Layer::new(1, Activation::Sigmoid)])
//!     .unwrap();
//!
//! let mut provider = AnyProvider::new(Backend::Pool).unwrap();
//! let config = provider.create_config();
//! provider.init(Some(&config)).unwrap();
//! let mut network = provider.create_network().unwrap();
//! network.init(&topology).unwrap();
//!
//! let mut out = [0.0; 1];
//! network.evaluate(1, &[0.5, 0.5], &mut out).unwrap();
//! assert!((out[0] - 0.5).abs() < 1e-6);
//!
//! provider.destroy_network(network).unwrap();
//! provider.destroy_config(config).unwrap();
//! ```

use super::cpu::{CpuConfig, CpuNetwork, CpuProvider};
use super::pool::{PoolConfig, PoolNetwork, PoolProvider};
#[cfg(feature = "wgpu")]
use super::wgpu::{GpuConfig, GpuNetwork, GpuProvider};
use super::{ComputeNetwork, ComputeNeurons, Provider, SyncType};
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::net;

macro_rules! delegate {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Self::Cpu($inner) => $body,
            Self::Pool($inner) => $body,
            #[cfg(feature = "wgpu")]
            Self::Wgpu($inner) => $body,
        }
    };
}

fn mismatch(what: &str, expected: Backend, found: Backend) -> Error {
    Error::invalid_arg(format!(
        "{what} belongs to the {found} backend, not {expected}"
    ))
}

/// Backend tuning object of any backend.
#[derive(Debug, Clone)]
pub enum AnyConfig {
    /// Single-threaded backend.
    Cpu(CpuConfig),
    /// Worker-pool backend.
    Pool(PoolConfig),
    /// GPU backend.
    #[cfg(feature = "wgpu")]
    Wgpu(GpuConfig),
}

impl AnyConfig {
    /// Backend the configuration belongs to.
    #[must_use]
    pub const fn backend(&self) -> Backend {
        match self {
            Self::Cpu(_) => Backend::Cpu,
            Self::Pool(_) => Backend::Pool,
            #[cfg(feature = "wgpu")]
            Self::Wgpu(_) => Backend::Wgpu,
        }
    }
}

/// Provider of any backend.
#[derive(Debug)]
pub enum AnyProvider {
    /// Single-threaded backend.
    Cpu(CpuProvider),
    /// Worker-pool backend.
    Pool(PoolProvider),
    /// GPU backend.
    #[cfg(feature = "wgpu")]
    Wgpu(GpuProvider),
}

impl AnyProvider {
    /// Creates an uninitialized provider for `backend`.
    ///
    /// # Errors
    /// - `NotFound` if the backend was not compiled into this build.
    pub fn new(backend: Backend) -> Result<Self> {
        match backend {
            Backend::Cpu => Ok(Self::Cpu(CpuProvider::new())),
            Backend::Pool => Ok(Self::Pool(PoolProvider::new())),
            #[cfg(feature = "wgpu")]
            Backend::Wgpu => Ok(Self::Wgpu(GpuProvider::new())),
            #[cfg(not(feature = "wgpu"))]
            Backend::Wgpu => Err(Error::not_found("the wgpu backend is not compiled in")),
        }
    }

    /// Backend tag.
    #[must_use]
    pub fn backend(&self) -> Backend {
        delegate!(self, p => p.backend())
    }

    /// Default configuration for this backend.
    #[must_use]
    pub fn create_config(&self) -> AnyConfig {
        match self {
            Self::Cpu(p) => AnyConfig::Cpu(p.create_config()),
            Self::Pool(p) => AnyConfig::Pool(p.create_config()),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(p) => AnyConfig::Wgpu(p.create_config()),
        }
    }

    /// Releases a configuration created by this backend.
    ///
    /// # Errors
    /// - `InvalidArg` if `config` belongs to another backend.
    pub fn destroy_config(&self, config: AnyConfig) -> Result<()> {
        let backend = self.backend();
        if config.backend() == backend {
            Ok(())
        } else {
            Err(mismatch("config", backend, config.backend()))
        }
    }

    /// Acquires backend resources.
    ///
    /// # Errors
    /// - `InvalidArg` if `config` belongs to another backend.
    /// - Whatever the backend's own init reports.
    pub fn init(&mut self, config: Option<&AnyConfig>) -> Result<()> {
        let backend = self.backend();
        match (self, config) {
            (Self::Cpu(p), None) => p.init(None),
            (Self::Cpu(p), Some(AnyConfig::Cpu(c))) => p.init(Some(c)),
            (Self::Pool(p), None) => p.init(None),
            (Self::Pool(p), Some(AnyConfig::Pool(c))) => p.init(Some(c)),
            #[cfg(feature = "wgpu")]
            (Self::Wgpu(p), None) => p.init(None),
            #[cfg(feature = "wgpu")]
            (Self::Wgpu(p), Some(AnyConfig::Wgpu(c))) => p.init(Some(c)),
            (_, Some(other)) => Err(mismatch("config", backend, other.backend())),
        }
    }

    /// Releases backend resources.
    pub fn uninit(&mut self) {
        delegate!(self, p => p.uninit());
    }

    /// Returns `true` between a successful init and uninit.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        delegate!(self, p => p.is_ok())
    }

    /// Creates an uninitialized mirror network.
    ///
    /// # Errors
    /// - `NotInitialized` before init.
    pub fn create_network(&self) -> Result<AnyNetwork> {
        Ok(match self {
            Self::Cpu(p) => AnyNetwork::Cpu(p.create_network()?),
            Self::Pool(p) => AnyNetwork::Pool(p.create_network()?),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(p) => AnyNetwork::Wgpu(p.create_network()?),
        })
    }

    /// Releases a network created by this backend.
    ///
    /// # Errors
    /// - `InvalidArg` if `network` belongs to another backend.
    pub fn destroy_network(&self, mut network: AnyNetwork) -> Result<()> {
        let backend = self.backend();
        if network.backend() != backend {
            return Err(mismatch("network", backend, network.backend()));
        }
        network.uninit();
        Ok(())
    }
}

/// Mirror network of any backend.
#[derive(Debug)]
pub enum AnyNetwork {
    /// Single-threaded backend.
    Cpu(CpuNetwork),
    /// Worker-pool backend.
    Pool(PoolNetwork),
    /// GPU backend.
    #[cfg(feature = "wgpu")]
    Wgpu(GpuNetwork),
}

impl AnyNetwork {
    /// Backend tag.
    #[must_use]
    pub fn backend(&self) -> Backend {
        delegate!(self, n => n.backend())
    }

    /// See [`ComputeNetwork::init`].
    ///
    /// # Errors
    /// As the backend's `init`.
    pub fn init(&mut self, topology: &net::Network) -> Result<()> {
        delegate!(self, n => n.init(topology))
    }

    /// See [`ComputeNetwork::uninit`].
    pub fn uninit(&mut self) {
        delegate!(self, n => n.uninit());
    }

    /// See [`ComputeNetwork::is_ok`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        delegate!(self, n => n.is_ok())
    }

    /// Number of non-input layers.
    #[must_use]
    pub fn layers_count(&self) -> u32 {
        delegate!(self, n => n.layers_count())
    }

    /// Width of the input group, `0` before init.
    #[must_use]
    pub fn input_count(&self) -> u32 {
        delegate!(self, n => n.input_neurons().map_or(0, ComputeNeurons::count))
    }

    /// Width of the output group, `0` before init.
    #[must_use]
    pub fn output_count(&self) -> u32 {
        delegate!(self, n => n.output_neurons().map_or(0, ComputeNeurons::count))
    }

    /// See [`ComputeNetwork::sync_to_ce`].
    ///
    /// # Errors
    /// As the backend's `sync_to_ce`.
    pub fn sync_to_ce(&mut self, topology: &net::Network, wait: bool, sync: SyncType) -> Result<()> {
        delegate!(self, n => n.sync_to_ce(topology, wait, sync))
    }

    /// See [`ComputeNetwork::sync_from_ce`].
    ///
    /// # Errors
    /// As the backend's `sync_from_ce`.
    pub fn sync_from_ce(
        &mut self,
        topology: &mut net::Network,
        wait: bool,
        sync: SyncType,
    ) -> Result<()> {
        delegate!(self, n => n.sync_from_ce(topology, wait, sync))
    }

    /// See [`ComputeNetwork::mem_size`].
    #[must_use]
    pub fn mem_size(&self) -> usize {
        delegate!(self, n => n.mem_size())
    }

    /// See [`ComputeNetwork::evaluate`].
    ///
    /// # Errors
    /// As the backend's `evaluate`.
    pub fn evaluate(&mut self, count: u32, inputs: &[f32], outputs: &mut [f32]) -> Result<()> {
        delegate!(self, n => n.evaluate(count, inputs, outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::net::{Activation, Layer};

    fn topology() -> net::Network {
        let mut net = net::Network::new();
        net.init(2, &[Layer::new(2, Activation::Relu), Layer::new(1, Activation::Identity)])
            .unwrap();
        net
    }

    #[test]
    fn cpu_backends_through_sum_types() {
        let topology = topology();
        for backend in [Backend::Cpu, Backend::Pool] {
            let mut provider = AnyProvider::new(backend).unwrap();
            assert_eq!(provider.backend(), backend);
            let config = provider.create_config();
            assert_eq!(config.backend(), backend);
            provider.init(Some(&config)).unwrap();
            let mut network = provider.create_network().unwrap();
            network.init(&topology).unwrap();
            assert_eq!((network.input_count(), network.output_count()), (2, 1));
            assert_eq!(network.layers_count(), 2);
            let mut out = [1.0];
            network.evaluate(1, &[1.0, 2.0], &mut out).unwrap();
            assert_eq!(out, [0.0]);
            provider.destroy_network(network).unwrap();
            provider.destroy_config(config).unwrap();
        }
    }

    #[test]
    fn foreign_objects_rejected() {
        let mut cpu = AnyProvider::new(Backend::Cpu).unwrap();
        let mut pool = AnyProvider::new(Backend::Pool).unwrap();
        cpu.init(None).unwrap();
        pool.init(None).unwrap();

        let err = cpu.destroy_network(pool.create_network().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
        let err = pool.destroy_config(cpu.create_config()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
        let err = pool.init(Some(&cpu.create_config())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn missing_backend_not_found() {
        let err = AnyProvider::new(Backend::Wgpu).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
