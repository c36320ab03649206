//! Output rendering for CLI commands.
//!
//! Every command returns a `String`; the format decides whether that is
//! human-readable text or JSON for scripting.

#![allow(clippy::format_push_string)]

use std::fmt::Write as _;

use serde::Serialize;

use crate::agent::{Citation, CitationKind, FinalResponse, ProviderInfo, Selection, UsageTotals};
use crate::store::SourceSummary;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
    /// One JSON document per line.
    Ndjson,
}

impl OutputFormat {
    /// Parses a format name; unknown names fall back to text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "ndjson" | "jsonl" => Self::Ndjson,
            _ => Self::Text,
        }
    }

    /// Serializes `value` in this format, ending with a newline.
    #[must_use]
    pub fn to_json<T: Serialize>(self, value: &T) -> String {
        let rendered = match self {
            Self::Ndjson => serde_json::to_string(value),
            Self::Text | Self::Json => serde_json::to_string_pretty(value),
        };
        match rendered {
            Ok(mut s) => {
                s.push('\n');
                s
            }
            Err(e) => format!("{{\"error\": \"serialization failed: {e}\"}}\n"),
        }
    }
}

/// Formats an answer with its citations.
pub fn format_answer(response: &FinalResponse, verbose: bool, format: OutputFormat) -> String {
    if format != OutputFormat::Text {
        return format.to_json(response);
    }

    let mut output = response.answer.trim_end().to_string();
    output.push('\n');
    output.push_str(&format_citations(&response.citations));

    if verbose {
        let trace = &response.trace;
        let kinds: Vec<&str> = trace.plan.kinds().iter().map(|k| k.as_str()).collect();
        output.push_str("\n--- trace ---\n");
        let _ = writeln!(output, "session:  {}", response.session_id);
        let _ = writeln!(
            output,
            "plan:     {}{}",
            kinds.join(" → "),
            if trace.plan.fallback { " (fallback)" } else { "" }
        );
        for step in trace.failed_steps() {
            let _ = writeln!(
                output,
                "failed:   {} ({})",
                step.kind.as_str(),
                step.error.as_deref().unwrap_or("no output")
            );
        }
        let _ = writeln!(output, "drafts:   {}", trace.drafts);
        if let Some(verdict) = &trace.verdict {
            let _ = writeln!(
                output,
                "verdict:  {} (confidence {:.2})",
                if verdict.supported { "supported" } else { "unsupported" },
                verdict.confidence
            );
            for note in &verdict.notes {
                let _ = writeln!(output, "          - {note}");
            }
        }
        if let Some(provider) = &trace.provider {
            let _ = writeln!(
                output,
                "provider: {provider}/{}",
                trace.model.as_deref().unwrap_or("?")
            );
        }
        let _ = writeln!(
            output,
            "tokens:   {} in, {} out",
            trace.usage.prompt_tokens, trace.usage.completion_tokens
        );
        let _ = writeln!(output, "elapsed:  {} ms", trace.elapsed_ms);
    }
    output
}

/// Formats a numbered citation list; empty when there are none.
pub fn format_citations(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let mut output = String::from("\nSources:\n");
    for (i, citation) in citations.iter().enumerate() {
        let name = citation
            .source_name
            .as_deref()
            .unwrap_or(&citation.source_id);
        let locator = match (citation.kind, citation.line, citation.page) {
            (CitationKind::Web, ..) => format!(" <{}>", citation.source_id),
            (_, _, Some(page)) => format!(", page {page}"),
            (_, Some(line), None) => format!(", line {line}"),
            (_, None, None) => String::new(),
        };
        let _ = writeln!(output, "  [{}] {name}{locator}", i + 1);
    }
    output
}

/// Formats the result of an ingest.
pub fn format_ingest(source_id: &str, chunks: usize, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!("Ingested {chunks} chunk(s) from {source_id}\n"),
        OutputFormat::Json | OutputFormat::Ndjson => format.to_json(&serde_json::json!({
            "source_id": source_id,
            "chunks": chunks,
        })),
    }
}

/// Formats the list of stored sources.
pub fn format_sources(sources: &[SourceSummary], format: OutputFormat) -> String {
    if format != OutputFormat::Text {
        return format.to_json(&sources);
    }
    if sources.is_empty() {
        return "No sources ingested.\n".to_string();
    }

    let mut output = format!("{:<40} {:>7}  {}\n", "SOURCE", "CHUNKS", "EXPIRES");
    for source in sources {
        let expires = source
            .expires_at
            .map_or_else(|| "never".to_string(), |t| t.to_string());
        let mut id = source.source_id.clone();
        if let Some(name) = &source.source_name
            && name != &source.source_id
        {
            id = format!("{id} ({name})");
        }
        output.push_str(&format!("{id:<40} {:>7}  {expires}\n", source.chunks));
    }
    output
}

/// Formats the provider catalogue with the current selection marked.
pub fn format_providers(
    providers: &[ProviderInfo],
    current: Option<&Selection>,
    format: OutputFormat,
) -> String {
    if format != OutputFormat::Text {
        return format.to_json(&serde_json::json!({
            "current": current,
            "providers": providers,
        }));
    }

    let mut output = String::new();
    for info in providers {
        let marker = if current.is_some_and(|c| c.provider == info.name) {
            '*'
        } else {
            ' '
        };
        let status = if info.available { "available" } else { "no key" };
        let _ = writeln!(
            output,
            "{marker} {:<10} {:<10} default {}{}",
            info.name,
            status,
            info.default_model,
            if info.function_calling { ", tools" } else { "" }
        );
    }
    match current {
        Some(selection) => {
            let _ = writeln!(output, "\nCurrent: {}/{}", selection.provider, selection.model);
        }
        None => output.push_str("\nNo provider configured. Set an API key such as OPENAI_API_KEY.\n"),
    }
    output
}

/// Formats usage totals.
pub fn format_usage(totals: &UsageTotals, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!(
            "calls: {}, tokens: {} in / {} out, cost: ${:.4}, avg latency: {:.0} ms\n",
            totals.calls,
            totals.prompt_tokens,
            totals.completion_tokens,
            totals.cost,
            totals.avg_latency_ms
        ),
        OutputFormat::Json | OutputFormat::Ndjson => format.to_json(totals),
    }
}
