//! CLI command implementations.
//!
//! Each command returns its rendered output; `main` writes it to stdout.
//! Streaming `ask` is the exception and writes answer chunks as they
//! arrive.

#![allow(clippy::format_push_string)]

use std::io::{self, Write as IoWrite};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::{AgenticEngine, EngineConfig, PromptSet, Query, StreamEvent};
use crate::cli::output::{
    OutputFormat, format_answer, format_citations, format_ingest, format_providers,
    format_sources, format_usage,
};
use crate::cli::parser::{Cli, Commands};
use crate::error::{AgentError, CommandError};
use crate::store::{Embedder, SqliteVectorStore, chunk_text, create_embedder, unix_now};
use crate::tools::ToolRegistry;

/// Result alias for command execution.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Parameters for the `ask` command.
#[derive(Debug, Clone, Default)]
pub struct AskParams<'a> {
    /// The question.
    pub question: &'a str,
    /// Conversation to continue.
    pub session: Option<&'a str>,
    /// Passages to retrieve.
    pub top_k: Option<usize>,
    /// Source restriction.
    pub sources: &'a [String],
    /// Allow web search.
    pub web: bool,
    /// Skip planning and verification.
    pub no_agentic: bool,
    /// Stream the answer.
    pub stream: bool,
}

/// Engine overrides shared by `ask` and `serve`.
#[derive(Debug, Clone, Default)]
struct EngineOptions<'a> {
    provider: Option<&'a str>,
    model: Option<&'a str>,
    prompt_dir: Option<&'a Path>,
    persistent: bool,
}

/// Executes the CLI command.
///
/// # Errors
///
/// Returns an error if the command fails to execute.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let db_path = cli.get_db_path();

    match &cli.command {
        Commands::Ask {
            question,
            session,
            top_k,
            sources,
            web,
            no_agentic,
            provider,
            model,
            stream,
            prompt_dir,
        } => {
            let options = EngineOptions {
                provider: provider.as_deref(),
                model: model.as_deref(),
                prompt_dir: prompt_dir.as_deref(),
                persistent: true,
            };
            let params = AskParams {
                question,
                session: session.as_deref(),
                top_k: *top_k,
                sources,
                web: *web,
                no_agentic: *no_agentic,
                stream: *stream,
            };
            let engine = build_engine(&db_path, &options)?;
            cmd_ask(&engine, &params, cli.verbose, format)
        }
        Commands::Ingest {
            file,
            source_id,
            name,
            chunk_size,
            ttl_hours,
            keep,
        } => {
            let ttl = if *keep {
                None
            } else if let Some(hours) = ttl_hours {
                Some(Duration::from_secs(hours.saturating_mul(3_600)))
            } else {
                EngineConfig::from_env()?.retention
            };
            cmd_ingest(
                &db_path,
                file,
                source_id.as_deref(),
                name.as_deref(),
                *chunk_size,
                ttl,
                format,
            )
        }
        Commands::Sources => cmd_sources(&db_path, format),
        Commands::Purge { source } => cmd_purge(&db_path, source.as_deref(), format),
        Commands::Providers => cmd_providers(format),
        Commands::Tools => cmd_tools(format),
        Commands::Serve { addr, prompt_dir } => {
            let options = EngineOptions {
                prompt_dir: prompt_dir.as_deref(),
                persistent: true,
                ..EngineOptions::default()
            };
            cmd_serve(&db_path, *addr, &options)
        }
        Commands::InitPrompts { dir } => cmd_init_prompts(dir.as_deref(), format),
    }
}

// ==================== Helpers ====================

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to create async runtime: {e}"))
    })
}

fn embedder() -> Result<Arc<dyn Embedder>> {
    Ok(Arc::from(create_embedder()?))
}

fn open_store(db_path: &Path, embedder: &dyn Embedder) -> Result<SqliteVectorStore> {
    debug!(path = %db_path.display(), "opening store");
    Ok(SqliteVectorStore::open(db_path, embedder.dimensions())?)
}

fn build_engine(db_path: &Path, options: &EngineOptions<'_>) -> Result<Arc<AgenticEngine>> {
    let mut builder = EngineConfig::builder();
    if let Some(provider) = options.provider {
        builder = builder.provider(provider);
    }
    if let Some(model) = options.model {
        builder = builder.model(model);
    }
    if let Some(dir) = options.prompt_dir {
        builder = builder.prompt_dir(dir);
    }
    if options.persistent {
        builder = builder.db_path(db_path);
    }
    let config = builder.from_env().build()?;

    let embedder = embedder()?;
    let mut engine = AgenticEngine::builder(config).embedder(Arc::clone(&embedder));
    if options.persistent {
        let store = open_store(db_path, embedder.as_ref())?;
        engine = engine.store(Arc::new(store));
    }
    Ok(Arc::new(engine.build()?))
}

fn to_query(params: &AskParams<'_>) -> Query {
    let mut query = Query::new(params.question)
        .agentic(!params.no_agentic)
        .web_search(params.web);
    if let Some(session) = params.session {
        query = query.with_session(session);
    }
    if let Some(top_k) = params.top_k {
        query = query.with_top_k(top_k);
    }
    if !params.sources.is_empty() {
        query = query.with_sources(params.sources.to_vec());
    }
    query
}

// ==================== Command Implementations ====================

fn cmd_ask(
    engine: &Arc<AgenticEngine>,
    params: &AskParams<'_>,
    verbose: bool,
    format: OutputFormat,
) -> Result<String> {
    let query = to_query(params);
    let rt = runtime()?;

    if !params.stream {
        let response = rt.block_on(engine.query(&query))?;
        let mut output = format_answer(&response, verbose, format);
        if verbose && format == OutputFormat::Text {
            output.push_str(&format_usage(&engine.usage().totals(), format));
        }
        return Ok(output);
    }

    rt.block_on(async {
        let mut events = engine.query_stream(query, CancellationToken::new());
        let mut stdout = io::stdout();
        let mut output = String::new();

        while let Some(event) = events.next().await {
            if format != OutputFormat::Text {
                write!(stdout, "{}", OutputFormat::Ndjson.to_json(&event))?;
                stdout.flush()?;
                if let StreamEvent::Error { message } = event {
                    return Err(CommandError::ExecutionFailed(message));
                }
                continue;
            }

            match event {
                StreamEvent::Thinking { plan } => {
                    let kinds: Vec<&str> = plan.kinds().iter().map(|k| k.as_str()).collect();
                    info!(plan = %kinds.join(","), "planned");
                }
                StreamEvent::WebSearch { results } => {
                    info!(results = results.len(), "web search");
                }
                StreamEvent::Tool { name, result } => {
                    info!(tool = %name, success = result.success, "tool ran");
                }
                StreamEvent::Chunk { content } => {
                    write!(stdout, "{content}")?;
                    stdout.flush()?;
                }
                StreamEvent::Done {
                    citations,
                    session_id,
                } => {
                    output.push('\n');
                    output.push_str(&format_citations(&citations));
                    if verbose {
                        output.push_str(&format!("\nsession: {session_id}\n"));
                    }
                }
                StreamEvent::Error { message } => {
                    writeln!(stdout)?;
                    return Err(CommandError::ExecutionFailed(message));
                }
            }
        }
        Ok::<_, CommandError>(output)
    })
}

fn cmd_ingest(
    db_path: &Path,
    file: &Path,
    source_id: Option<&str>,
    name: Option<&str>,
    chunk_size: usize,
    ttl: Option<Duration>,
    format: OutputFormat,
) -> Result<String> {
    let text = std::fs::read_to_string(file).map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to read {}: {e}", file.display()))
    })?;
    let chunks = chunk_text(&text, chunk_size);
    if chunks.is_empty() {
        return Err(CommandError::ExecutionFailed(format!(
            "{} contains no text",
            file.display()
        )));
    }

    let source_id = source_id.map_or_else(|| file.to_string_lossy().into_owned(), str::to_string);
    let name = name
        .map(str::to_string)
        .or_else(|| file.file_name().map(|n| n.to_string_lossy().into_owned()));

    let embedder = embedder()?;
    let store = open_store(db_path, embedder.as_ref())?;
    let written = store.add_document(&source_id, name.as_deref(), &chunks, embedder.as_ref(), ttl)?;
    Ok(format_ingest(&source_id, written, format))
}

fn cmd_sources(db_path: &Path, format: OutputFormat) -> Result<String> {
    let embedder = embedder()?;
    let store = open_store(db_path, embedder.as_ref())?;
    let sources = store.list_sources(unix_now())?;
    Ok(format_sources(&sources, format))
}

fn cmd_purge(db_path: &Path, source: Option<&str>, format: OutputFormat) -> Result<String> {
    let embedder = embedder()?;
    let store = open_store(db_path, embedder.as_ref())?;
    let removed = match source {
        Some(id) => {
            let removed = store.delete_source(id)?;
            if removed == 0 {
                return Err(CommandError::ExecutionFailed(format!("No such source: {id}")));
            }
            removed
        }
        None => store.purge_expired(unix_now())?,
    };

    match format {
        OutputFormat::Text => Ok(format!("Removed {removed} chunk(s)\n")),
        OutputFormat::Json | OutputFormat::Ndjson => Ok(format.to_json(&serde_json::json!({
            "source": source,
            "removed": removed,
        }))),
    }
}

fn cmd_providers(format: OutputFormat) -> Result<String> {
    let engine = build_engine(Path::new(""), &EngineOptions::default())?;
    Ok(format_providers(
        &engine.providers(),
        engine.current_provider().as_ref(),
        format,
    ))
}

fn cmd_tools(format: OutputFormat) -> Result<String> {
    let config = EngineConfig::from_env()?;
    let registry = ToolRegistry::builtin(&config).map_err(AgentError::from)?;
    let mut definitions = registry.definitions();
    definitions.sort_by(|a, b| a.name.cmp(&b.name));

    match format {
        OutputFormat::Text => {
            let mut output = String::new();
            for definition in &definitions {
                output.push_str(&format!("{:<14} {}\n", definition.name, definition.description));
            }
            if !config.web_search_configured() {
                output.push_str("\nweb_search is off: set TAVILY_API_KEY or GOOGLE_SEARCH_API_KEY.\n");
            }
            if !config.code_execution_enabled {
                output.push_str("execute_code is registered but disabled.\n");
            }
            Ok(output)
        }
        OutputFormat::Json | OutputFormat::Ndjson => Ok(format.to_json(&definitions)),
    }
}

fn cmd_serve(db_path: &Path, addr: SocketAddr, options: &EngineOptions<'_>) -> Result<String> {
    let engine = build_engine(db_path, options)?;
    runtime()?
        .block_on(crate::server::serve(engine, addr))
        .map_err(|e| CommandError::ExecutionFailed(format!("{e:#}")))?;
    Ok(String::new())
}

fn cmd_init_prompts(dir: Option<&Path>, format: OutputFormat) -> Result<String> {
    let target_dir = dir
        .map(PathBuf::from)
        .or_else(PromptSet::default_dir)
        .ok_or_else(|| {
            CommandError::ExecutionFailed(
                "Could not determine the config directory for prompts".to_string(),
            )
        })?;

    let written = PromptSet::write_defaults(&target_dir).map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to write prompt templates: {e}"))
    })?;

    match format {
        OutputFormat::Text => {
            if written.is_empty() {
                return Ok(format!(
                    "All prompt templates already exist in: {}\n",
                    target_dir.display()
                ));
            }
            let mut output = format!(
                "Wrote {} prompt template(s) to: {}\n",
                written.len(),
                target_dir.display()
            );
            for path in &written {
                output.push_str(&format!(
                    "  {}\n",
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("unknown")
                ));
            }
            output.push_str("\nPoint RAGSTUDY_PROMPT_DIR at this directory to use them.\n");
            Ok(output)
        }
        OutputFormat::Json | OutputFormat::Ndjson => Ok(format.to_json(&serde_json::json!({
            "directory": target_dir.to_string_lossy(),
            "written": written.iter().map(|p| p.to_string_lossy().into_owned()).collect::<Vec<_>>(),
            "count": written.len(),
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    #[test]
    fn test_ingest_list_purge() {
        let dir = TempDir::new().unwrap_or_else(|_| unreachable!());
        let db = dir.path().join("store.db");
        let file = dir.path().join("notes.txt");
        let mut f = std::fs::File::create(&file).unwrap_or_else(|_| unreachable!());
        writeln!(f, "Rust has ownership. Borrowing is checked at compile time.")
            .unwrap_or_else(|_| unreachable!());

        let out = cmd_ingest(&db, &file, Some("notes"), None, 1_000, None, OutputFormat::Text)
            .unwrap_or_default();
        assert!(out.contains("from notes"));

        let listed = cmd_sources(&db, OutputFormat::Text).unwrap_or_default();
        assert!(listed.contains("notes"));
        assert!(listed.contains("notes.txt"));

        let purged = cmd_purge(&db, Some("notes"), OutputFormat::Text).unwrap_or_default();
        assert!(purged.starts_with("Removed 1"));
        assert!(cmd_purge(&db, Some("notes"), OutputFormat::Text).is_err());
    }

    #[test]
    fn test_ingest_empty_file_fails() {
        let dir = TempDir::new().unwrap_or_else(|_| unreachable!());
        let file = dir.path().join("empty.txt");
        std::fs::write(&file, "   \n").unwrap_or_else(|_| unreachable!());
        let result = cmd_ingest(
            &dir.path().join("s.db"),
            &file,
            None,
            None,
            1_000,
            None,
            OutputFormat::Text,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_init_prompts_is_idempotent() {
        let dir = TempDir::new().unwrap_or_else(|_| unreachable!());
        let first = cmd_init_prompts(Some(dir.path()), OutputFormat::Text).unwrap_or_default();
        assert!(first.starts_with("Wrote 6"));
        let second = cmd_init_prompts(Some(dir.path()), OutputFormat::Text).unwrap_or_default();
        assert!(second.starts_with("All prompt templates already exist"));
    }

    #[test]
    fn test_to_query_maps_flags() {
        let sources = vec!["a".to_string()];
        let query = to_query(&AskParams {
            question: "q",
            session: Some("s"),
            top_k: Some(3),
            sources: &sources,
            web: true,
            no_agentic: true,
            stream: false,
        });
        assert_eq!(query.session_id.as_deref(), Some("s"));
        assert_eq!(query.top_k, Some(3));
        assert_eq!(query.source_filter, Some(sources));
        assert!(query.use_web_search);
        assert!(!query.use_agentic);
    }
}
