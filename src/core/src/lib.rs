//! A3S OCI Core - Foundational Types
//!
//! Types shared by the image builder and the CLI: the error taxonomy,
//! degraded results carrying warnings, layer declarations and their parser,
//! target platforms, and the build description file schema.
//!
//! Nothing in this crate touches the filesystem except
//! [`ImageSpecFile::from_file`], which only reads.

pub mod config;
pub mod error;
pub mod layer;
pub mod outcome;
pub mod platform;

// Re-export commonly used types
pub use config::{CacheConfig, ImageMetadata, ImageSpecFile, InstallerConfig, PlatformSpec};
pub use error::{OciError, Result};
pub use layer::{parse_layer, parse_layers, LayerKind, LayerMode, LayerSpec};
pub use outcome::{Outcome, Warning, WarningKind};
pub use platform::{normalize_arch_from_oci, normalize_arch_to_oci, TargetPlatform};

/// A3S OCI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
