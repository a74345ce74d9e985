//! `a3s-oci extract` command.

use std::path::PathBuf;

use a3s_oci_builder::{extract_platform, is_image_index, list_platforms, select_platform_manifest};
use clap::Args;

#[derive(Args)]
pub struct ExtractArgs {
    /// Multi-architecture OCI layout
    pub dir: PathBuf,

    /// Architecture to extract (machine or OCI name)
    #[arg(long)]
    pub arch: String,

    /// Output OCI directory
    #[arg(short, long)]
    pub output: PathBuf,
}

pub fn execute(args: ExtractArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !is_image_index(&args.dir)? {
        return Err(format!(
            "{} is not a multi-architecture image (no platform-tagged manifests)",
            args.dir.display()
        )
        .into());
    }

    let entry = select_platform_manifest(&args.dir, &args.arch).map_err(|e| {
        let available = list_platforms(&args.dir).unwrap_or_default().join(", ");
        format!("{e}; available: {available}")
    })?;
    let copied = extract_platform(&args.dir, &args.output, &entry)?;

    println!("Extracted {} ({})", args.arch, entry.digest);
    println!("Blobs copied: {copied}");
    println!("Output: {}", args.output.display());
    Ok(())
}
