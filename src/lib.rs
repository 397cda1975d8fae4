//! AMD GPU monitoring and management CLI library.
//!
//! The `amd-smi` binary is a thin front end over this crate: BDF value
//! type, platform probing, the native library seam and its sysfs
//! backend, device registry, output logger, watch engine, and the
//! subcommand implementations.

pub mod bdf;
pub mod commands;
pub mod error;
pub mod logger;
pub mod platform;
pub mod registry;
pub mod signals;
pub mod smi;
pub mod watch;

pub use bdf::{Bdf, BdfError};
pub use error::{AmdSmiError, Result};
pub use logger::{Compatibility, OutputFormat, OutputLogger};
pub use platform::{InitFlag, Platform};
pub use registry::{DeviceRegistry, GpuSelector};
pub use smi::{Smi, SmiBackend, SysfsSmi};
