//! CLI command definitions and dispatch.

mod build;
mod cache;
mod extract;
mod inspect;
mod merge;

use clap::{Parser, Subcommand, ValueEnum};

/// a3s-oci: compose OCI images from locally built root filesystems.
#[derive(Parser)]
#[command(name = "a3s-oci", version, about)]
pub struct Cli {
    /// Log build progress (info level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build a single-architecture OCI image
    Build(build::BuildArgs),
    /// Merge per-architecture images into a multi-architecture index
    Merge(merge::MergeArgs),
    /// List the manifests of an OCI layout
    Inspect(inspect::InspectArgs),
    /// Extract one architecture from a multi-architecture layout
    Extract(extract::ExtractArgs),
    /// Manage the layer cache
    Cache(cache::CacheArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build(args) => build::execute(args),
        Command::Merge(args) => merge::execute(args),
        Command::Inspect(args) => inspect::execute(args),
        Command::Extract(args) => extract::execute(args),
        Command::Cache(args) => cache::execute(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_overrides() {
        let cli = Cli::try_parse_from([
            "a3s-oci",
            "--verbose",
            "build",
            "-f",
            "image.yaml",
            "--arch",
            "aarch64",
            "--no-cache",
            "--search-dir",
            "/deploy",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.arch.as_deref(), Some("aarch64"));
                assert!(args.no_cache);
                assert_eq!(args.search_dirs.len(), 1);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_parse_merge_requires_platform() {
        assert!(Cli::try_parse_from(["a3s-oci", "merge", "-o", "/out"]).is_err());
        let cli = Cli::try_parse_from([
            "a3s-oci",
            "--log-format",
            "json",
            "merge",
            "-o",
            "/out",
            "--platform",
            "aarch64=/a",
            "--platform",
            "x86_64=/b",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Merge(args) => assert_eq!(args.platforms.len(), 2),
            _ => panic!("expected merge"),
        }
    }
}
