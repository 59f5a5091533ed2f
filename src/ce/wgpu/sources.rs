//! Kernel source registry.
//!
//! The GPU program is the concatenation of every registered WGSL source,
//! in registration order. The built-in kernels are assembled once per
//! process; callers may start from them or from an empty registry and
//! add their own, inline or from disk.

use crate::error::{Error, ErrorKind, Result};
use std::fs::File;
use std::io::Read;

/// Largest accepted single source, in bytes.
pub const MAX_SOURCE_LEN: usize = 16 * 1024 * 1024;

/// Prefix that turns a registered source into a file path.
pub const FILE_PREFIX: &str = "file://";

const COMMON: &str = include_str!("shaders/common.wgsl");
const COMPUTE: &str = include_str!("shaders/compute.wgsl");
const ACTIVATE: &str = include_str!("shaders/activate.wgsl");

lazy_static::lazy_static! {
    static ref BUILTIN_PROGRAM: String = [COMMON, COMPUTE, ACTIVATE].join("\n");
}

/// Ordered list of WGSL sources making up the GPU program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelSources {
    sources: Vec<String>,
}

impl KernelSources {
    /// An empty registry. Initializing a provider with it fails.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// The built-in kernels: `compute`, `compute_with_bias`, `exp_sum`
    /// and `activate`.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            sources: vec![BUILTIN_PROGRAM.clone()],
        }
    }

    /// Appends a source. A `file://` prefix loads the rest as a path.
    ///
    /// # Errors
    /// - `InvalidArg` for an empty source or one over [`MAX_SOURCE_LEN`].
    /// - `OpenFailed` / `ReadFailed` when the file cannot be opened or read.
    pub fn register(&mut self, source: &str) -> Result<()> {
        let text = match source.strip_prefix(FILE_PREFIX) {
            Some(path) => read_source(path)?,
            None => source.to_owned(),
        };
        if text.is_empty() {
            return Err(Error::invalid_arg("kernel source is empty"));
        }
        if text.len() > MAX_SOURCE_LEN {
            return Err(Error::invalid_arg(format!(
                "kernel source of {} bytes exceeds {MAX_SOURCE_LEN}",
                text.len()
            )));
        }
        self.sources.push(text);
        Ok(())
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The full program text.
    ///
    /// # Errors
    /// - `NotInitialized` if the registry is empty.
    pub fn program(&self) -> Result<String> {
        if self.sources.is_empty() {
            return Err(Error::not_initialized("no kernel sources registered"));
        }
        Ok(self.sources.join("\n"))
    }
}

fn read_source(path: &str) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| Error::new(ErrorKind::OpenFailed, format!("{path}: {e}")))?;
    // Read at most one byte past the limit.
    let mut text = String::new();
    file.by_ref()
        .take(MAX_SOURCE_LEN as u64 + 1)
        .read_to_string(&mut text)
        .map_err(|e| Error::new(ErrorKind::ReadFailed, format!("{path}: {e}")))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_exposes_entry_points() {
        let program = KernelSources::builtin().program().unwrap();
        for entry in ["fn compute(", "fn compute_with_bias(", "fn exp_sum(", "fn activate("] {
            assert!(program.contains(entry), "{entry}");
        }
    }

    #[test]
    fn empty_registry_not_initialized() {
        let err = KernelSources::new().program().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
    }

    #[test]
    fn register_inline_and_from_file() {
        let path = std::env::temp_dir().join(format!("briny_infer_src_{}.wgsl", std::process::id()));
        std::fs::write(&path, "fn helper() -> f32 { return 1.0; }").unwrap();

        let mut sources = KernelSources::builtin();
        sources.register("fn other() {}").unwrap();
        sources
            .register(&format!("{FILE_PREFIX}{}", path.display()))
            .unwrap();
        assert_eq!(sources.len(), 3);
        assert!(sources.program().unwrap().ends_with("return 1.0; }"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn register_rejects_bad_sources() {
        let mut sources = KernelSources::new();
        assert_eq!(sources.register("").unwrap_err().kind(), ErrorKind::InvalidArg);
        let missing = format!("{FILE_PREFIX}/nonexistent/briny_infer/kernel.wgsl");
        assert_eq!(sources.register(&missing).unwrap_err().kind(), ErrorKind::OpenFailed);
        let huge = "x".repeat(MAX_SOURCE_LEN + 1);
        assert_eq!(sources.register(&huge).unwrap_err().kind(), ErrorKind::InvalidArg);
        assert!(sources.is_empty());
    }
}
