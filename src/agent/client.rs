//! Provider catalogue and factory.
//!
//! Maps provider names to concrete [`LlmProvider`] implementations and
//! reports which providers are usable with the configured keys.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::agent::config::EngineConfig;
use crate::agent::provider::LlmProvider;
use crate::agent::providers::{AnthropicProvider, OpenAiCompatProvider};
use crate::error::{AgentError, ProviderError};

/// Supported provider backends, in default-selection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini via its `OpenAI`-compatible endpoint.
    Gemini,
    /// Groq via its `OpenAI`-compatible endpoint.
    Groq,
    /// `OpenAI` or any compatible API.
    OpenAi,
}

impl ProviderKind {
    /// Every provider, highest priority first.
    pub const ALL: [Self; 4] = [Self::Anthropic, Self::Gemini, Self::Groq, Self::OpenAi];

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::OpenAi => "openai",
        }
    }

    /// Parses a provider name (case-insensitive; `claude` and `google` are aliases).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "gemini" | "google" => Some(Self::Gemini),
            "groq" => Some(Self::Groq),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    /// Model used when none is requested.
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::Gemini => "gemini-2.5-flash",
            Self::Groq => "llama-3.3-70b-versatile",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    /// Well-known models offered for selection.
    #[must_use]
    pub const fn models(self) -> &'static [&'static str] {
        match self {
            Self::Anthropic => &[
                "claude-sonnet-4-20250514",
                "claude-opus-4-20250514",
                "claude-3-5-haiku-20241022",
            ],
            Self::Gemini => &["gemini-2.5-flash", "gemini-2.5-pro"],
            Self::Groq => &["llama-3.3-70b-versatile", "llama-3.1-8b-instant"],
            Self::OpenAi => &["gpt-4o-mini", "gpt-4o"],
        }
    }

    /// `OpenAI`-compatible base URL, for providers that need one.
    #[must_use]
    pub const fn base_url(self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("https://generativelanguage.googleapis.com/v1beta/openai/"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Anthropic | Self::OpenAi => None,
        }
    }

    /// Environment variable holding the API key.
    #[must_use]
    pub const fn key_variable(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalogue entry for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    /// Provider name.
    pub name: String,
    /// Whether the provider can be created right now.
    pub available: bool,
    /// Model used when none is requested.
    pub default_model: String,
    /// Models offered for selection.
    pub models: Vec<String>,
    /// Whether the provider supports function calling.
    pub function_calling: bool,
}

/// Creates providers by name.
pub trait ProviderFactory: Send + Sync {
    /// Every known provider, in priority order.
    fn providers(&self) -> Vec<ProviderInfo>;

    /// Creates `name` with `model` (or its default model).
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnsupportedProvider`] for unknown names and
    /// [`AgentError::NoProvider`] when the provider is not configured.
    fn create(&self, name: &str, model: Option<&str>) -> Result<Arc<dyn LlmProvider>, AgentError>;
}

/// Factory backed by API keys from [`EngineConfig`].
#[derive(Clone)]
pub struct ConfiguredProviders {
    keys: Vec<(ProviderKind, String)>,
    openai_base_url: Option<String>,
}

impl ConfiguredProviders {
    /// Collects provider keys from configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let keys = [
            (ProviderKind::Anthropic, &config.anthropic_api_key),
            (ProviderKind::Gemini, &config.gemini_api_key),
            (ProviderKind::Groq, &config.groq_api_key),
            (ProviderKind::OpenAi, &config.openai_api_key),
        ]
        .into_iter()
        .filter_map(|(kind, key)| key.clone().map(|k| (kind, k)))
        .collect();

        Self {
            keys,
            openai_base_url: config.openai_base_url.clone(),
        }
    }

    fn key(&self, kind: ProviderKind) -> Option<&str> {
        self.keys
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, key)| key.as_str())
    }
}

impl fmt::Debug for ConfiguredProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let configured: Vec<&str> = self.keys.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ConfiguredProviders")
            .field("configured", &configured)
            .field("openai_base_url", &self.openai_base_url)
            .finish()
    }
}

impl ProviderFactory for ConfiguredProviders {
    fn providers(&self) -> Vec<ProviderInfo> {
        ProviderKind::ALL
            .into_iter()
            .map(|kind| ProviderInfo {
                name: kind.as_str().to_string(),
                available: self.key(kind).is_some(),
                default_model: kind.default_model().to_string(),
                models: kind.models().iter().map(ToString::to_string).collect(),
                function_calling: true,
            })
            .collect()
    }

    fn create(&self, name: &str, model: Option<&str>) -> Result<Arc<dyn LlmProvider>, AgentError> {
        let kind = ProviderKind::parse(name).ok_or_else(|| AgentError::UnsupportedProvider {
            name: name.to_string(),
        })?;
        let key = self.key(kind).ok_or_else(|| AgentError::NoProvider {
            hint: format!("set {} to use {kind}", kind.key_variable()),
        })?;
        let model = model.unwrap_or_else(|| kind.default_model());

        let provider: Arc<dyn LlmProvider> = match kind {
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(key, model)?),
            ProviderKind::OpenAi => Arc::new(OpenAiCompatProvider::new(
                kind,
                key,
                self.openai_base_url.as_deref(),
                model,
            )),
            ProviderKind::Gemini | ProviderKind::Groq => {
                Arc::new(OpenAiCompatProvider::new(kind, key, kind.base_url(), model))
            }
        };
        Ok(provider)
    }
}

/// Factory over pre-built provider instances, for embedding and tests.
///
/// Each instance is returned as-is; the requested model is ignored.
#[derive(Clone, Default)]
pub struct FixedProviders {
    providers: Vec<Arc<dyn LlmProvider>>,
}

impl FixedProviders {
    /// Wraps providers, highest priority first.
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        Self { providers }
    }
}

impl fmt::Debug for FixedProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("FixedProviders").field("providers", &names).finish()
    }
}

impl ProviderFactory for FixedProviders {
    fn providers(&self) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .map(|p| ProviderInfo {
                name: p.name().to_string(),
                available: true,
                default_model: p.model().to_string(),
                models: vec![p.model().to_string()],
                function_calling: p.capabilities().function_calling,
            })
            .collect()
    }

    fn create(&self, name: &str, _model: Option<&str>) -> Result<Arc<dyn LlmProvider>, AgentError> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| AgentError::UnsupportedProvider {
                name: name.to_string(),
            })
    }
}

/// Maps a provider construction failure to an unavailable provider.
pub(crate) fn unavailable(provider: &'static str, reason: impl fmt::Display) -> ProviderError {
    ProviderError::Unavailable {
        provider,
        reason: reason.to_string(),
    }
}
