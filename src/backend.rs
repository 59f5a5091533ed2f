//! Backend tag.
//!
//! Every provider, mirror network and configuration object carries one of
//! these tags, so ownership checks at the type-erased boundary
//! ([`crate::ce::dispatch`]) compare tags instead of downcasting.
//!
//! # Supported Backends
//!
//! - `Cpu`: single-threaded reference path on the calling thread (default).
//! - `Pool`: CPU path fanned out over a fixed pool of worker threads.
//! - `Wgpu`: GPU path using `wgpu` compute shaders (feature `wgpu`).

use crate::error::Error;
use core::convert::TryFrom;
use core::fmt;

/// Enumeration of supported computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// Single-threaded CPU backend (default).
    #[default]
    Cpu = 0,
    /// Worker-pool CPU backend.
    Pool,
    /// GPU-accelerated backend using `wgpu`.
    Wgpu,
}

impl Backend {
    /// Returns `true` when the backend was compiled into this build.
    #[must_use]
    pub const fn is_available(self) -> bool {
        match self {
            Self::Cpu | Self::Pool => true,
            Self::Wgpu => cfg!(feature = "wgpu"),
        }
    }

    /// Short lowercase name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Pool => "pool",
            Self::Wgpu => "wgpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Backend {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Pool),
            2 => Ok(Self::Wgpu),
            _ => Err(Error::invalid_arg(format!("unknown backend tag {value}"))),
        }
    }
}
