//! Context assembled for drafting, and the citations derived from it.
//!
//! Citations are computed from exactly the items rendered into the draft
//! prompt, so every citation points at something the provider saw.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::tool::ToolResult;
use crate::core::truncate_chars;
use crate::retrieval::RetrievedPassage;
use crate::tools::web_search::{self, WebHit};

/// Characters of source text kept in a citation.
pub const CITATION_SPAN_CHARS: usize = 200;

const ITEM_SEPARATOR: &str = "\n\n---\n\n";

/// Where a citation points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationKind {
    /// An uploaded document.
    Document,
    /// A web search result.
    Web,
}

/// A reference to evidence given to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Source id for documents, URL for web results.
    pub source_id: String,
    /// Source name or page title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// First characters of the cited text.
    pub content: String,
    /// Line locator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Page locator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Document or web.
    pub kind: CitationKind,
}

/// One piece of evidence in the context buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextItem {
    /// A retrieved document passage.
    Passage(RetrievedPassage),
    /// A successful tool result.
    Tool(ToolResult),
}

/// Ordered evidence for one query.
#[derive(Debug, Clone, Default)]
pub struct ContextBuffer {
    items: Vec<ContextItem>,
    seen_passages: HashSet<(String, u32)>,
}

impl ContextBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends passages, skipping chunks already present.
    pub fn push_passages(&mut self, passages: impl IntoIterator<Item = RetrievedPassage>) {
        for passage in passages {
            if self
                .seen_passages
                .insert((passage.source_id.clone(), passage.offset))
            {
                self.items.push(ContextItem::Passage(passage));
            }
        }
    }

    /// Appends a tool result. Failed results are not evidence and are
    /// ignored; returns whether the result was kept.
    pub fn push_tool(&mut self, result: ToolResult) -> bool {
        if !result.success {
            return false;
        }
        self.items.push(ContextItem::Tool(result));
        true
    }

    /// Items in insertion order.
    #[must_use]
    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    /// Returns `true` if nothing was gathered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Renders the buffer as the context block of the draft prompt.
    #[must_use]
    pub fn render(&self) -> String {
        let mut blocks = Vec::new();
        let mut source_n = 0;
        let mut web_n = 0;
        for item in &self.items {
            match item {
                ContextItem::Passage(p) => {
                    source_n += 1;
                    let locator = match (p.line, p.page) {
                        (_, Some(page)) => format!(" | page {page}"),
                        (Some(line), None) => format!(" | line {line}"),
                        (None, None) => String::new(),
                    };
                    blocks.push(format!(
                        "[Source {source_n}: {}{locator}]\n{}",
                        p.display_name(),
                        p.text
                    ));
                }
                ContextItem::Tool(result) if result.name == web_search::TOOL_NAME => {
                    for hit in web_search::hits_from_payload(&result.payload) {
                        web_n += 1;
                        blocks.push(format!(
                            "[Web Result {web_n}: {}]\n{}\nURL: {}",
                            hit.title, hit.snippet, hit.url
                        ));
                    }
                }
                ContextItem::Tool(result) => {
                    let payload = serde_json::to_string_pretty(&result.payload)
                        .unwrap_or_else(|_| result.payload.to_string());
                    blocks.push(format!("[Tool: {}]\n{payload}", result.name));
                }
            }
        }
        blocks.join(ITEM_SEPARATOR)
    }

    /// Citations for documents and web results, in context order,
    /// one per distinct chunk or URL.
    #[must_use]
    pub fn citations(&self) -> Vec<Citation> {
        let mut seen = HashSet::new();
        let mut citations = Vec::new();
        for item in &self.items {
            match item {
                ContextItem::Passage(p) => {
                    if seen.insert((CitationKind::Document, p.source_id.clone(), p.offset)) {
                        citations.push(Citation {
                            source_id: p.source_id.clone(),
                            source_name: p.source_name.clone(),
                            content: truncate_chars(&p.text, CITATION_SPAN_CHARS).0,
                            line: p.line,
                            page: p.page,
                            kind: CitationKind::Document,
                        });
                    }
                }
                ContextItem::Tool(result) if result.name == web_search::TOOL_NAME => {
                    for hit in web_search::hits_from_payload(&result.payload) {
                        if seen.insert((CitationKind::Web, hit.url.clone(), 0)) {
                            citations.push(Citation {
                                content: truncate_chars(&hit.snippet, CITATION_SPAN_CHARS).0,
                                source_id: hit.url,
                                source_name: Some(hit.title),
                                line: None,
                                page: None,
                                kind: CitationKind::Web,
                            });
                        }
                    }
                }
                ContextItem::Tool(_) => {}
            }
        }
        citations
    }

    /// Web hits from every web search result in the buffer.
    #[must_use]
    pub fn web_hits(&self) -> Vec<WebHit> {
        self.items
            .iter()
            .filter_map(|item| match item {
                ContextItem::Tool(r) if r.name == web_search::TOOL_NAME => {
                    Some(web_search::hits_from_payload(&r.payload))
                }
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Plain text of each item, for verification.
    #[must_use]
    pub fn evidence_texts(&self) -> Vec<String> {
        self.items
            .iter()
            .flat_map(|item| match item {
                ContextItem::Passage(p) => vec![p.text.clone()],
                ContextItem::Tool(r) if r.name == web_search::TOOL_NAME => {
                    web_search::hits_from_payload(&r.payload)
                        .into_iter()
                        .map(|h| format!("{} {}", h.title, h.snippet))
                        .collect()
                }
                ContextItem::Tool(r) => vec![r.payload.to_string()],
            })
            .collect()
    }

    /// Successful tool results named `name`.
    pub fn tool_results<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ToolResult> {
        self.items.iter().filter_map(move |item| match item {
            ContextItem::Tool(r) if r.name == name => Some(r),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::agent::tool::ToolCall;

    fn passage(source: &str, offset: u32, text: &str) -> RetrievedPassage {
        RetrievedPassage {
            text: text.to_string(),
            source_id: source.to_string(),
            source_name: Some(format!("{source}.txt")),
            line: Some(offset + 1),
            page: None,
            offset,
            score: 0.8,
        }
    }

    fn web_result(urls: &[&str]) -> ToolResult {
        let call = ToolCall::new("w1", web_search::TOOL_NAME, json!({"query": "q"}));
        let results: Vec<_> = urls
            .iter()
            .map(|u| json!({"title": format!("T {u}"), "url": u, "snippet": "snip", "score": 0.5}))
            .collect();
        ToolResult::success(&call, json!({"query": "q", "results": results}))
    }

    #[test]
    fn test_passages_dedup_by_chunk() {
        let mut buffer = ContextBuffer::new();
        buffer.push_passages(vec![passage("a", 0, "one"), passage("a", 0, "one again")]);
        buffer.push_passages(vec![passage("a", 1, "two")]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_failed_tools_are_not_evidence() {
        let mut buffer = ContextBuffer::new();
        let call = ToolCall::new("c1", "calculator", json!({"expression": "1/"}));
        assert!(!buffer.push_tool(ToolResult::failure(&call, json!(null), "bad")));
        assert!(buffer.is_empty());
        assert!(buffer.citations().is_empty());
    }

    #[test]
    fn test_render_numbers_sources_and_web_results() {
        let mut buffer = ContextBuffer::new();
        buffer.push_passages(vec![passage("notes", 0, "Mitochondria make ATP.")]);
        buffer.push_tool(web_result(&["https://a.example", "https://b.example"]));
        let call = ToolCall::new("c1", "calculator", json!({"expression": "2+2"}));
        buffer.push_tool(ToolResult::success(&call, json!({"formatted": "4"})));

        let rendered = buffer.render();
        assert!(rendered.starts_with("[Source 1: notes.txt | line 1]\nMitochondria make ATP."));
        assert!(rendered.contains("[Web Result 2: T https://b.example]\nsnip\nURL: https://b.example"));
        assert!(rendered.contains("[Tool: calculator]"));
        assert_eq!(rendered.matches(ITEM_SEPARATOR).count(), 3);
    }

    #[test]
    fn test_citations_only_documents_and_web() {
        let mut buffer = ContextBuffer::new();
        buffer.push_passages(vec![passage("notes", 0, &"x".repeat(500))]);
        buffer.push_tool(web_result(&["https://a.example", "https://a.example"]));
        let call = ToolCall::new("c1", "calculator", json!({}));
        buffer.push_tool(ToolResult::success(&call, json!({"formatted": "4"})));

        let citations = buffer.citations();
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].kind, CitationKind::Document);
        assert_eq!(citations[0].content.chars().count(), CITATION_SPAN_CHARS);
        assert_eq!(citations[1].kind, CitationKind::Web);
        assert_eq!(citations[1].source_id, "https://a.example");
        assert_eq!(buffer.web_hits().len(), 2);
    }
}
