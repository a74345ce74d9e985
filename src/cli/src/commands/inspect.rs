//! `a3s-oci inspect` command.

use std::path::{Path, PathBuf};

use a3s_oci_builder::oci::layout::read_index;
use a3s_oci_builder::{BlobStore, Descriptor, Manifest};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct InspectArgs {
    /// OCI layout directory
    pub dir: PathBuf,

    /// Print index.json as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: InspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let index = read_index(&args.dir)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&index)?);
        return Ok(());
    }

    let mut table = output::new_table(&["MANIFEST", "PLATFORM", "REF", "LAYERS", "SIZE"]);
    for entry in &index.manifests {
        table.add_row(&[
            output::short_digest(&entry.digest),
            entry
                .platform
                .as_ref()
                .map(|p| format!("{}/{}", p.os, p.label()))
                .unwrap_or_else(|| "-".to_string()),
            entry.ref_name().unwrap_or("-").to_string(),
            layer_count(&args.dir, entry),
            output::format_bytes(entry.size),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Layer count of a manifest, or `?` when its blob is unreadable.
fn layer_count(dir: &Path, entry: &Descriptor) -> String {
    BlobStore::open(dir)
        .and_then(|store| store.read(&entry.digest))
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Manifest>(&bytes).ok())
        .map(|m| m.layers.len().to_string())
        .unwrap_or_else(|| "?".to_string())
}
