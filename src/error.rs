//! Error types for the AMD SMI CLI

use std::io;
use thiserror::Error;

/// Result type alias for asmi operations
pub type Result<T> = std::result::Result<T, AmdSmiError>;

/// Main error type for the CLI and its library layer
#[derive(Error, Debug)]
pub enum AmdSmiError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// BDF parse error
    #[error("BDF error: {0}")]
    Bdf(#[from] crate::bdf::BdfError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid argument (bad selector, out-of-range watch parameter, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No supported driver was live at init time
    #[error("Drivers not loaded (amdgpu and amd_hsmp not found in modules)")]
    DriverNotLoaded,

    /// The native library init returned a non-success code
    #[error("Library initialization failed with status {0}")]
    LibraryInit(i32),

    /// Field not available on this device/SKU; recorded as "N/A", never fatal
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Device or handle not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Nix error (Unix)
    #[cfg(unix)]
    #[error("Nix error: {0}")]
    Nix(#[from] nix::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl AmdSmiError {
    /// Whether this error is a per-field condition recorded as `N/A`
    /// rather than aborting the device or the invocation.
    pub fn is_field_error(&self) -> bool {
        matches!(self, AmdSmiError::NotSupported(_))
    }

    /// Process exit code for a terminal error.
    pub fn exit_code(&self) -> i32 {
        match self {
            AmdSmiError::InvalidArgument(_) | AmdSmiError::Bdf(_) | AmdSmiError::Parse(_) => 2,
            AmdSmiError::DriverNotLoaded => -1,
            AmdSmiError::LibraryInit(code) => *code,
            _ => 1,
        }
    }
}
