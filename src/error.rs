//! Error type shared by every layer of the crate.
//!
//! All fallible operations return [`Result`], whose error carries an
//! [`ErrorKind`] for programmatic matching and a message for humans.
//! Nothing in the crate panics on bad caller input; it reports
//! [`ErrorKind::InvalidArg`] instead.

use core::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad caller input: zero counts, oversized specs, mismatched buffers.
    InvalidArg,
    /// Operation on an object that was never initialized or was released.
    NotInitialized,
    /// Host or device allocation failed.
    MemAllocFailed,
    /// A device or thread-pool operation failed.
    OperationFailed,
    /// A file could not be opened or its header is not recognized.
    OpenFailed,
    /// A file could not be created.
    CreateFailed,
    /// A read came back short or failed.
    ReadFailed,
    /// A write came back short or failed.
    WriteFailed,
    /// No suitable device exists.
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArg => "invalid argument",
            Self::NotInitialized => "not initialized",
            Self::MemAllocFailed => "memory allocation failed",
            Self::OperationFailed => "operation failed",
            Self::OpenFailed => "open failed",
            Self::CreateFailed => "create failed",
            Self::ReadFailed => "read failed",
            Self::WriteFailed => "write failed",
            Self::NotFound => "not found",
        };
        f.write_str(name)
    }
}

/// The crate error: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`ErrorKind::InvalidArg`].
    pub fn invalid_arg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArg, message)
    }

    /// Shorthand for [`ErrorKind::NotInitialized`].
    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotInitialized, message)
    }

    /// Shorthand for [`ErrorKind::OperationFailed`].
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationFailed, message)
    }

    /// Shorthand for [`ErrorKind::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Returns the failure classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the diagnostic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
