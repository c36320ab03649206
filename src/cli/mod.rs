//! CLI layer for ragstudy.
//!
//! Provides the command-line interface using clap, with commands for
//! ingesting documents, asking questions and running the HTTP API.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands};
