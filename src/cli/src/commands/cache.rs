//! `a3s-oci cache` command: list and remove layer cache entries.

use std::path::PathBuf;

use a3s_oci_builder::build::default_cache_dir;
use a3s_oci_builder::{CacheEntry, LayerCache};
use a3s_oci_core::platform::normalize_arch_from_oci;
use clap::{Args, Subcommand};

use crate::output;

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// List cache entries
    List(CacheListArgs),
    /// Remove cache entries
    Rm(CacheRmArgs),
}

#[derive(Args)]
pub struct CacheDirArgs {
    /// Layer cache directory
    #[arg(long, env = "A3S_OCI_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Package architecture whose default cache is used
    #[arg(long)]
    pub package_arch: Option<String>,
}

impl CacheDirArgs {
    fn resolve(&self) -> Result<PathBuf, String> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let arch = self
            .package_arch
            .clone()
            .unwrap_or_else(|| normalize_arch_from_oci(std::env::consts::ARCH));
        default_cache_dir(&arch).ok_or_else(|| "no user cache directory; pass --cache-dir".to_string())
    }
}

#[derive(Args)]
pub struct CacheListArgs {
    #[command(flatten)]
    pub dir: CacheDirArgs,

    /// Only print entry directory names
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct CacheRmArgs {
    #[command(flatten)]
    pub dir: CacheDirArgs,

    /// Entries to remove, by layer name or key prefix
    #[arg(required_unless_present = "all")]
    pub entries: Vec<String>,

    /// Remove every entry
    #[arg(long)]
    pub all: bool,

    /// Do not fail when an entry matches nothing
    #[arg(short, long)]
    pub force: bool,
}

pub fn execute(args: CacheArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        CacheCommand::List(args) => list(args),
        CacheCommand::Rm(args) => rm(args),
    }
}

fn list(args: CacheListArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dir = args.dir.resolve()?;
    if !dir.exists() {
        if !args.quiet {
            println!("{}", output::new_table(&["KEY", "LAYER", "TYPE", "SIZE", "CREATED"]));
        }
        return Ok(());
    }

    let entries = LayerCache::new(&dir)?.list_entries()?;
    if args.quiet {
        for entry in &entries {
            println!("{}", entry_dir_name(entry));
        }
        return Ok(());
    }

    let mut table = output::new_table(&["KEY", "LAYER", "TYPE", "SIZE", "CREATED"]);
    let mut total = 0;
    for entry in &entries {
        total += entry.size_bytes;
        table.add_row(&[
            entry.key.chars().take(12).collect::<String>(),
            entry.layer_name.clone(),
            entry.layer_type.clone(),
            output::format_bytes(entry.size_bytes),
            entry.created.clone(),
        ]);
    }
    println!("{table}");
    println!();
    println!(
        "{} entries, {} in {}",
        entries.len(),
        output::format_bytes(total),
        dir.display()
    );
    Ok(())
}

fn rm(args: CacheRmArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cache = LayerCache::new(&args.dir.resolve()?)?;

    if args.all {
        let removed = cache.clear()?;
        println!("Removed {removed} entries");
        return Ok(());
    }

    let entries = cache.list_entries()?;
    let mut errors = Vec::new();
    for pattern in &args.entries {
        let matched = matching(&entries, pattern);
        if matched.is_empty() {
            if !args.force {
                errors.push(format!("{pattern}: no matching cache entry"));
            }
            continue;
        }
        for entry in matched {
            if cache.invalidate(&entry.key, &entry.layer_name)? {
                println!("Removed: {}", entry_dir_name(entry));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("\n").into())
    }
}

fn entry_dir_name(entry: &CacheEntry) -> String {
    format!("{}-{}", entry.key, entry.layer_name)
}

/// Entries whose layer name equals `pattern` or whose key starts with it.
fn matching<'a>(entries: &'a [CacheEntry], pattern: &str) -> Vec<&'a CacheEntry> {
    entries
        .iter()
        .filter(|e| e.layer_name == pattern || e.key.starts_with(pattern))
        .collect()
}
