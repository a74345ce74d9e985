//! `a3s-oci merge` command.

use std::path::PathBuf;

use a3s_oci_builder::{merge_platform_images, PlatformSource};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct MergeArgs {
    /// Output OCI directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// `<arch>=<dir>[,<oci-arch>]`, repeated in index order
    #[arg(long = "platform", required = true)]
    pub platforms: Vec<String>,
}

pub fn execute(args: MergeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let sources = args
        .platforms
        .iter()
        .map(|p| p.parse::<PlatformSource>())
        .collect::<Result<Vec<_>, _>>()?;

    let outcome = merge_platform_images(&sources, &args.output)?;
    let report = &outcome.value;

    let mut table = output::new_table(&["PLATFORM", "MANIFEST", "SIZE"]);
    for entry in &report.entries {
        table.add_row(&[
            entry
                .platform
                .as_ref()
                .map(|p| p.label())
                .unwrap_or_default(),
            output::short_digest(&entry.digest),
            output::format_bytes(entry.size),
        ]);
    }
    println!("{table}");
    println!();
    println!(
        "Blobs: {} copied, {} already present",
        report.blobs_copied, report.blobs_skipped
    );
    for arch in &report.skipped_platforms {
        println!("Skipped {arch}: no manifests");
    }
    println!("Output: {}", args.output.display());
    Ok(())
}
