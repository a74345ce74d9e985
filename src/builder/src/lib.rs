//! A3S OCI Builder
//!
//! Composes OCI image layouts from a locally built root filesystem:
//!
//! - [`build`]: configuration, layer population, and the build engine
//! - [`cache`]: content-keyed cache of populated layer roots
//! - [`oci`]: blob store, layout documents, base images, and multi-arch indexes

pub mod build;
pub mod cache;
pub mod oci;

pub use build::{
    build, BaseImageKind, BaseImageRef, BuildConfig, BuildOutputLocator, BuildOverrides,
    BuildResult, CommandInstaller, DeployDirLocator, LayerReport, PackageInstaller,
};
pub use cache::{CacheEntry, LayerCache};
pub use oci::{
    extract_platform, is_image_index, list_platforms, merge_platform_images,
    select_platform_manifest, BlobStore, Descriptor, Index, Manifest, MergeReport,
    Platform, PlatformSource,
};
