//! `a3s-oci build` command.

use std::path::PathBuf;

use a3s_oci_builder::{
    build, BuildConfig, BuildOverrides, BuildResult, CommandInstaller, DeployDirLocator,
    PackageInstaller,
};
use a3s_oci_core::{ImageSpecFile, Warning};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct BuildArgs {
    /// Build description (YAML, or JSON by extension)
    #[arg(short = 'f', long = "file", default_value = "image.yaml")]
    pub file: PathBuf,

    /// Output OCI directory
    #[arg(short, long, env = "A3S_OCI_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Layer cache directory
    #[arg(long, env = "A3S_OCI_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Populate every layer without consulting the cache
    #[arg(long)]
    pub no_cache: bool,

    /// Source rootfs
    #[arg(long)]
    pub rootfs: Option<PathBuf>,

    /// Target architecture (machine or OCI name)
    #[arg(long)]
    pub arch: Option<String>,

    /// Package-feed architecture
    #[arg(long)]
    pub package_arch: Option<String>,

    /// Base image: absolute OCI directory or build output name
    #[arg(long)]
    pub base_image: Option<String>,

    /// Directory searched for named base images (repeatable)
    #[arg(long = "search-dir")]
    pub search_dirs: Vec<PathBuf>,

    /// Machine name tried first when locating `<name>-<machine>-oci`
    #[arg(long, env = "A3S_OCI_MACHINE")]
    pub machine: Option<String>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl BuildArgs {
    fn overrides(&self) -> BuildOverrides {
        BuildOverrides {
            output: self.output.clone(),
            cache_dir: self.cache_dir.clone(),
            no_cache: self.no_cache,
            rootfs: self.rootfs.clone(),
            arch: self.arch.clone(),
            package_arch: self.package_arch.clone(),
            base_image: self.base_image.clone(),
            search_dirs: self.search_dirs.clone(),
        }
    }
}

pub fn execute(args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut spec = ImageSpecFile::from_file(&args.file)?;
    args.overrides().apply(&mut spec);

    let locator = DeployDirLocator::new(spec.search_dirs.clone(), args.machine.clone());
    let mut warnings = Vec::new();
    let config = BuildConfig::from_spec(&spec, &locator)?.drain_into(&mut warnings);

    let installer = match config.installer {
        Some(ref installer) => Some(CommandInstaller::new(installer.clone())?),
        None => None,
    };
    let outcome = build(
        &config,
        installer.as_ref().map(|i| i as &dyn PackageInstaller),
    )?;
    let result = outcome.drain_into(&mut warnings);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result_json(&result, &warnings))?);
    } else {
        print_result(&result, &warnings);
    }
    Ok(())
}

fn print_result(result: &BuildResult, warnings: &[Warning]) {
    let mut table = output::new_table(&["LAYER", "DIGEST", "SIZE", "SOURCE"]);
    for layer in &result.layers {
        let source = if layer.base {
            "base"
        } else if layer.from_cache {
            "cache"
        } else {
            "built"
        };
        table.add_row(&[
            layer.name.clone(),
            output::short_digest(&layer.digest),
            output::format_bytes(layer.size),
            source.to_string(),
        ]);
    }

    println!("{table}");
    println!();
    println!("Manifest: {}", result.manifest_digest);
    println!("Output:   {}", result.output.display());
    if !warnings.is_empty() {
        println!("Warnings: {}", warnings.len());
        for warning in warnings {
            println!("  {warning}");
        }
    }
}

fn result_json(result: &BuildResult, warnings: &[Warning]) -> serde_json::Value {
    serde_json::json!({
        "manifest": result.manifest_digest,
        "manifest_size": result.manifest_size,
        "config": result.config_digest,
        "output": result.output.display().to_string(),
        "layers": result.layers.iter().map(|l| serde_json::json!({
            "name": l.name,
            "digest": l.digest,
            "size": l.size,
            "from_cache": l.from_cache,
            "base": l.base,
        })).collect::<Vec<_>>(),
        "warnings": warnings,
    })
}
