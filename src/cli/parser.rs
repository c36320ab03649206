//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::agent::EngineConfig;
use crate::store::loader::DEFAULT_CHUNK_CHARS;

/// ragstudy: agentic question answering over your documents.
///
/// Ingest text files, then ask questions and get answers with citations,
/// optionally backed by web search and a calculator.
#[derive(Parser, Debug)]
#[command(name = "ragstudy")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the document database.
    ///
    /// Defaults to `ragstudy/ragstudy.db` under the user data directory.
    #[arg(short, long, env = "RAGSTUDY_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json, ndjson).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Database path from the flag, or the default location.
    #[must_use]
    pub fn get_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .or_else(EngineConfig::default_db_path)
            .unwrap_or_else(|| PathBuf::from("ragstudy.db"))
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question about the ingested documents.
    #[command(after_help = r#"Examples:
  ragstudy ask "What does the contract say about renewal?"
  ragstudy ask "What is 17% of 2300?"                 # Uses the calculator
  ragstudy ask "Latest Rust release?" --web           # Allow web search
  ragstudy ask "Summarize it" --session s1            # Continue a conversation
  ragstudy ask "Key risks?" --source report.txt -k 8  # Only one source
  ragstudy ask "Explain" --provider groq --stream
  ragstudy --format json ask "Who signed?" | jq '.citations'
"#)]
    Ask {
        /// The question.
        question: String,

        /// Conversation to continue.
        #[arg(short, long)]
        session: Option<String>,

        /// Passages to retrieve.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Restrict retrieval to these source ids (repeatable).
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Allow web search.
        #[arg(short, long)]
        web: bool,

        /// Single retrieval and draft; skip planning and verification.
        #[arg(long)]
        no_agentic: bool,

        /// Provider to use (openai, anthropic, groq, gemini).
        #[arg(short, long, env = "RAGSTUDY_PROVIDER")]
        provider: Option<String>,

        /// Model to use; the provider default when omitted.
        #[arg(short, long, env = "RAGSTUDY_MODEL")]
        model: Option<String>,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,

        /// Directory containing prompt template files.
        #[arg(long, env = "RAGSTUDY_PROMPT_DIR")]
        prompt_dir: Option<PathBuf>,
    },

    /// Chunk, embed and store a text file.
    #[command(after_help = r#"Examples:
  ragstudy ingest notes.txt                      # Source id is the path
  ragstudy ingest report.txt --source-id q3      # Custom source id
  ragstudy ingest scratch.txt --ttl-hours 2      # Expire after two hours
  ragstudy ingest handbook.txt --keep            # Never expire
"#)]
    Ingest {
        /// Path to the text file.
        file: PathBuf,

        /// Source id; defaults to the file path.
        #[arg(long)]
        source_id: Option<String>,

        /// Display name; defaults to the file name.
        #[arg(short, long)]
        name: Option<String>,

        /// Chunk size in characters.
        #[arg(long, default_value_t = DEFAULT_CHUNK_CHARS)]
        chunk_size: usize,

        /// Retention in hours; the configured default when omitted.
        #[arg(long, conflicts_with = "keep")]
        ttl_hours: Option<u64>,

        /// Keep the chunks forever.
        #[arg(long)]
        keep: bool,
    },

    /// List ingested sources.
    #[command(alias = "ls")]
    Sources,

    /// Delete one source, or every expired chunk.
    #[command(after_help = r#"Examples:
  ragstudy purge                    # Drop expired chunks
  ragstudy purge --source notes.txt # Drop one source
"#)]
    Purge {
        /// Source id to delete.
        #[arg(long)]
        source: Option<String>,
    },

    /// List LLM providers and their availability.
    Providers,

    /// List registered tools.
    Tools,

    /// Run the HTTP API.
    #[command(after_help = r#"Examples:
  ragstudy serve                       # http://127.0.0.1:8000
  ragstudy serve --addr 0.0.0.0:9000
  curl -N -X POST localhost:8000/query/stream \
       -H 'content-type: application/json' -d '{"question":"hi"}'
"#)]
    Serve {
        /// Listen address.
        #[arg(long, default_value = "127.0.0.1:8000", env = "RAGSTUDY_ADDR")]
        addr: SocketAddr,

        /// Directory containing prompt template files.
        #[arg(long, env = "RAGSTUDY_PROMPT_DIR")]
        prompt_dir: Option<PathBuf>,
    },

    /// Write the default prompt templates for editing.
    ///
    /// Existing files are left untouched.
    #[command(after_help = r#"Examples:
  ragstudy init-prompts                 # ~/.config/ragstudy/prompts
  ragstudy init-prompts --dir ./prompts
"#)]
    InitPrompts {
        /// Target directory.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}
