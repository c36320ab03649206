//! System prompts and template builders.
//!
//! Prompts define the drafting voice and the JSON contracts of the
//! provider-backed planner, expander, re-ranker and verifier. Template
//! builders format user messages with the question and its context.

use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// System prompt for drafting answers.
pub const DRAFT_SYSTEM_PROMPT: &str = r"You are a friendly and knowledgeable study tutor helping a student learn.

Your job:
- Answer the question naturally and conversationally, the way a helpful tutor would.
- Ground your answer in the provided context. Prefer it over your own knowledge.
- Explain concepts clearly, with examples when they help.
- Cite sparingly: add [Source N] or [Web Result N] only after specific facts or quotes taken from that item.
- If the context does not cover the question, say so, then help from general knowledge and make clear which parts did not come from the sources.
- When a computed result is provided, use it exactly as given.
- Stay consistent with the earlier conversation.";

/// System prompt for the provider-backed planner.
pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are a query planning expert. You decide which steps are needed to answer a student's question before anything is executed.

Available step kinds:
- "retrieve": search the student's uploaded materials. Only when sources are available.
- "web_search": search the web for current or external information. Only when web search is enabled.
- "compute": evaluate arithmetic. Put the bare expression in "input" (e.g. "(3 + 4) * 2").
- "direct_answer": write the answer. Always the last step, exactly once.

Rules:
- Use as few steps as possible. Greetings and small talk need only "direct_answer".
- Give each step a one-sentence reason.

Respond with JSON only:
{"steps": [{"kind": "retrieve", "reason": "...", "input": null}, {"kind": "direct_answer", "reason": "..."}]}"#;

/// System prompt for provider-backed query expansion.
pub const EXPANDER_SYSTEM_PROMPT: &str = r#"You rewrite search queries for a semantic document search engine.

Produce alternative phrasings of the question that would match relevant passages: use synonyms, expand abbreviations, and split compound questions into their parts. Do not answer the question.

Respond with a JSON array of strings only, e.g. ["variant one", "variant two"]."#;

/// System prompt for provider-backed re-ranking.
pub const RERANK_SYSTEM_PROMPT: &str = r#"You judge whether a passage helps answer a question.

Respond with JSON only: {"relevant": true | false, "confidence": <number between 0 and 1>}"#;

/// System prompt for the provider-backed verifier.
pub const VERIFIER_SYSTEM_PROMPT: &str = r#"You are a meticulous fact checker. You compare a draft answer against the evidence it was written from.

Check:
1. Every factual claim in the draft is supported by the evidence.
2. Computed results are quoted correctly.
3. The draft actually answers the question.

Claims from general knowledge that the draft clearly marks as such are acceptable.

Respond with JSON only:
{"supported": true | false, "confidence": <number between 0 and 1>, "notes": ["specific problem to fix", "..."]}"#;

/// System prompt for compute steps that need a function call.
pub const COMPUTE_SYSTEM_PROMPT: &str = "You solve the calculation part of a student's question by calling exactly one of the provided tools. Use the calculator for arithmetic and execute_code only when the calculation needs a program.";

/// Default prompt directory under the user's config directory.
const DEFAULT_PROMPT_SUBDIR: &str = "ragstudy/prompts";

const DRAFT_FILENAME: &str = "draft.md";
const PLANNER_FILENAME: &str = "planner.md";
const EXPANDER_FILENAME: &str = "expander.md";
const RERANK_FILENAME: &str = "rerank.md";
const VERIFIER_FILENAME: &str = "verifier.md";
const COMPUTE_FILENAME: &str = "compute.md";

/// A set of system prompts for every provider-backed stage.
///
/// Loaded from external template files when available, falling back to
/// compiled-in defaults. Use [`PromptSet::load`] to resolve the prompt
/// directory from configuration, environment, or the default path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    /// Drafting prompt.
    pub draft: String,
    /// Planner prompt.
    pub planner: String,
    /// Query expansion prompt.
    pub expander: String,
    /// Re-ranking prompt.
    pub rerank: String,
    /// Verifier prompt.
    pub verifier: String,
    /// Function-calling prompt for compute steps.
    pub compute: String,
}

impl PromptSet {
    /// Loads prompts from the given directory, falling back to compiled-in defaults.
    ///
    /// Resolution order for `prompt_dir`:
    /// 1. Explicit `prompt_dir` argument
    /// 2. `RAGSTUDY_PROMPT_DIR` environment variable
    /// 3. `<config dir>/ragstudy/prompts/`
    ///
    /// Each file is loaded independently; a missing file uses its default.
    #[must_use]
    pub fn load(prompt_dir: Option<&Path>) -> Self {
        let resolved_dir = prompt_dir
            .map(PathBuf::from)
            .or_else(|| std::env::var("RAGSTUDY_PROMPT_DIR").ok().map(PathBuf::from))
            .or_else(Self::default_dir);

        let load_file = |filename: &str, default: &str| -> String {
            resolved_dir
                .as_ref()
                .map(|dir| dir.join(filename))
                .and_then(|path| std::fs::read_to_string(&path).ok())
                .filter(|content| !content.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            draft: load_file(DRAFT_FILENAME, DRAFT_SYSTEM_PROMPT),
            planner: load_file(PLANNER_FILENAME, PLANNER_SYSTEM_PROMPT),
            expander: load_file(EXPANDER_FILENAME, EXPANDER_SYSTEM_PROMPT),
            rerank: load_file(RERANK_FILENAME, RERANK_SYSTEM_PROMPT),
            verifier: load_file(VERIFIER_FILENAME, VERIFIER_SYSTEM_PROMPT),
            compute: load_file(COMPUTE_FILENAME, COMPUTE_SYSTEM_PROMPT),
        }
    }

    /// Returns compiled-in defaults without checking the filesystem.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            draft: DRAFT_SYSTEM_PROMPT.to_string(),
            planner: PLANNER_SYSTEM_PROMPT.to_string(),
            expander: EXPANDER_SYSTEM_PROMPT.to_string(),
            rerank: RERANK_SYSTEM_PROMPT.to_string(),
            verifier: VERIFIER_SYSTEM_PROMPT.to_string(),
            compute: COMPUTE_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Writes the compiled-in default prompts to the given directory.
    ///
    /// Creates the directory if it does not exist. Existing files are
    /// **not** overwritten; use this for initial scaffolding only.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if directory creation or file writing fails.
    pub fn write_defaults(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let templates = [
            (DRAFT_FILENAME, DRAFT_SYSTEM_PROMPT),
            (PLANNER_FILENAME, PLANNER_SYSTEM_PROMPT),
            (EXPANDER_FILENAME, EXPANDER_SYSTEM_PROMPT),
            (RERANK_FILENAME, RERANK_SYSTEM_PROMPT),
            (VERIFIER_FILENAME, VERIFIER_SYSTEM_PROMPT),
            (COMPUTE_FILENAME, COMPUTE_SYSTEM_PROMPT),
        ];

        let mut written = Vec::new();
        for (filename, content) in &templates {
            let path = dir.join(filename);
            if !path.exists() {
                std::fs::write(&path, content)?;
                written.push(path);
            }
        }

        Ok(written)
    }

    /// Returns the default prompt directory.
    ///
    /// Returns `None` if the config directory cannot be determined.
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(DEFAULT_PROMPT_SUBDIR))
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Builds the drafting user message.
///
/// `notes` carries verifier feedback from a rejected earlier draft.
#[must_use]
pub fn build_draft_prompt(question: &str, context: &str, notes: &[String]) -> String {
    let mut prompt = String::new();

    if context.trim().is_empty() {
        prompt.push_str("No materials or search results were found for this question.\n\n");
    } else {
        let _ = write!(
            prompt,
            "Context from uploaded materials, web search and tools:\n\n{context}\n\n"
        );
    }

    if !notes.is_empty() {
        prompt.push_str("A previous draft was rejected by a fact check. Fix these problems:\n");
        for note in notes {
            let _ = writeln!(prompt, "- {note}");
        }
        prompt.push('\n');
    }

    let _ = write!(
        prompt,
        "Student's question: {question}\n\nGive a helpful, natural response:"
    );
    prompt
}

/// Builds the planner user message.
#[must_use]
pub fn build_planner_prompt(question: &str, has_sources: bool, web_search_enabled: bool) -> String {
    format!(
        "<question>{question}</question>\n\
         <sources_available>{has_sources}</sources_available>\n\
         <web_search_enabled>{web_search_enabled}</web_search_enabled>"
    )
}

/// Builds the query expansion user message.
#[must_use]
pub fn build_expander_prompt(question: &str, variants: usize) -> String {
    format!("Write up to {variants} alternative search queries for:\n<question>{question}</question>")
}

/// Builds the re-ranking user message for one passage.
#[must_use]
pub fn build_rerank_prompt(question: &str, passage: &str) -> String {
    format!("<question>{question}</question>\n<passage>\n{passage}\n</passage>")
}

/// Builds the verifier user message.
#[must_use]
pub fn build_verifier_prompt(question: &str, draft: &str, evidence: &str) -> String {
    format!(
        "<question>{question}</question>\n\n<evidence>\n{evidence}\n</evidence>\n\n<draft>\n{draft}\n</draft>"
    )
}

/// Fenced block (optionally tagged `json`) anywhere in a response.
static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").ok());

/// Outermost JSON object, for replies that wrap it in prose.
static JSON_OBJECT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").ok());

/// Extracts the JSON payload from a model response.
///
/// Prefers the contents of a fenced code block, then the outermost
/// `{...}` span. Falls back to the trimmed response.
#[must_use]
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let fenced = CODE_FENCE
        .as_ref()
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim());
    let body = fenced.unwrap_or(trimmed);
    JSON_OBJECT
        .as_ref()
        .and_then(|re| re.find(body))
        .map_or(body, |m| m.as_str())
}
