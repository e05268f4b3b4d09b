//! Kernel Parity CLI
//!
//! # Commands
//!
//! - `run` - Build artifacts, run two kernels, compare their outputs
//! - `compare` - Compare two existing kernel logs
//! - `kernels` - List supported kernels

use std::process::ExitCode;

use clap::Parser;
use kernel_parity::cli::{self, normalize_legacy_flags, Cli};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_legacy_flags(std::env::args()));
    init_tracing(cli.verbose);

    match cli::entrypoint(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        },
    }
}
