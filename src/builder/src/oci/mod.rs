//! OCI image layout support.
//!
//! - `layout`: document shapes and `index.json`/`oci-layout` I/O
//! - `blobs`: content-addressed blob store with atomic writes
//! - `image`: base image loading
//! - `index`: multi-architecture merge, inspection, and extraction

pub mod blobs;
pub mod image;
pub mod index;
pub mod layout;

pub use blobs::{sha256_digest, BlobStore, DigestWriter};
pub use image::{verify_layout, BaseImage, BaseImageConfig};
pub use index::{
    extract_platform, is_image_index, list_platforms, merge_platform_images,
    select_platform_manifest, MergeReport, PlatformSource,
};
pub use layout::{Descriptor, Index, Manifest, Platform};
