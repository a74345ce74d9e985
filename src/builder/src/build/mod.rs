//! Single-architecture image builds.

pub mod assemble;
pub mod config;
pub mod engine;
pub mod installer;
pub mod layer;
pub mod populate;
pub mod resolve;

pub use assemble::{read_image_config, BuildResult, LayerReport};
pub use config::{default_cache_dir, resolve_created, BuildConfig, BuildOverrides, ResolvedBase};
pub use engine::{build, ResolvedLayer, ROOTFS_LAYER};
pub use installer::{CommandInstaller, PackageInstaller};
pub use layer::{write_layer, LayerBlob};
pub use resolve::{
    resolve_base_image, BaseImageKind, BaseImageRef, BuildOutputLocator, DeployDirLocator,
};
