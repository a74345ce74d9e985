//! a3s-oci CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_oci_cli::commands::{dispatch, Cli, LogFormat};
use a3s_oci_core::OciError;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    if let Err(e) = dispatch(cli) {
        eprintln!("Error: {e}");
        if let Some(hint) = e.downcast_ref::<OciError>().and_then(OciError::hint) {
            eprintln!("Hint: {hint}");
        }
        std::process::exit(1);
    }
}

/// Logs go to stderr so stdout carries only command output.
fn init_tracing(verbose: bool, format: LogFormat) {
    let default = if verbose {
        "warn,a3s_oci_builder=info,a3s_oci_core=info,a3s_oci_cli=info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
