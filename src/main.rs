//! ragstudy command-line entry point.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ragstudy::cli::{Cli, execute};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "ragstudy=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RAGSTUDY_LOG").unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match execute(&cli) {
        Ok(output) => {
            let mut stdout = io::stdout();
            if stdout.write_all(output.as_bytes()).and_then(|()| stdout.flush()).is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            let _ = writeln!(io::stderr(), "Error: {e}");
            ExitCode::FAILURE
        }
    }
}
