//! Current provider/model selection, shared across queries.
//!
//! The selection is the only process-wide provider state. Queries may
//! override it; an override naming an unavailable provider falls back to
//! the current selection.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{info, warn};

use super::client::{ProviderFactory, ProviderInfo};
use super::provider::LlmProvider;
use crate::error::AgentError;

/// A provider name and model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: String,
}

/// RwLock-guarded provider selection over a [`ProviderFactory`].
pub struct ProviderSelection {
    factory: Arc<dyn ProviderFactory>,
    current: RwLock<Option<Selection>>,
}

impl std::fmt::Debug for ProviderSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSelection")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

impl ProviderSelection {
    /// Creates a selection; `preferred` is used when available, else the
    /// highest-priority available provider.
    #[must_use]
    pub fn new(factory: Arc<dyn ProviderFactory>, preferred: Option<Selection>) -> Self {
        let selection = Self {
            factory,
            current: RwLock::new(None),
        };
        let initial = preferred
            .filter(|p| selection.is_available(&p.provider))
            .or_else(|| selection.default_selection());
        *selection
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = initial;
        selection
    }

    fn is_available(&self, name: &str) -> bool {
        self.factory
            .providers()
            .iter()
            .any(|p| p.available && p.name == name)
    }

    fn default_selection(&self) -> Option<Selection> {
        self.factory
            .providers()
            .into_iter()
            .find(|p| p.available)
            .map(|p| Selection {
                provider: p.name,
                model: p.default_model,
            })
    }

    /// Current selection, if any provider is available.
    #[must_use]
    pub fn current(&self) -> Option<Selection> {
        self.current
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Every known provider.
    #[must_use]
    pub fn list(&self) -> Vec<ProviderInfo> {
        self.factory.providers()
    }

    /// Switches the current provider and model.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnsupportedProvider`] for unknown names and
    /// [`AgentError::NoProvider`] when the provider is not configured.
    pub fn set(&self, provider: &str, model: Option<&str>) -> Result<Selection, AgentError> {
        let info = self
            .factory
            .providers()
            .into_iter()
            .find(|p| p.name == provider)
            .ok_or_else(|| AgentError::UnsupportedProvider {
                name: provider.to_string(),
            })?;
        if !info.available {
            return Err(AgentError::NoProvider {
                hint: format!("{provider} is not configured"),
            });
        }

        let selection = Selection {
            provider: info.name,
            model: model.map_or(info.default_model, ToString::to_string),
        };
        *self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(selection.clone());
        info!(provider = %selection.provider, model = %selection.model, "provider selected");
        Ok(selection)
    }

    /// Creates the provider for a query.
    ///
    /// An override naming an unavailable provider falls back to the current
    /// selection. A model override without a provider applies to the
    /// current provider.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NoProvider`] when nothing is available.
    pub fn resolve(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Arc<dyn LlmProvider>, AgentError> {
        if let Some(name) = provider {
            if self.is_available(name) {
                return self.factory.create(name, model);
            }
            warn!(provider = name, "requested provider unavailable, using default");
        }

        let current = self.current().ok_or_else(|| AgentError::NoProvider {
            hint: "set ANTHROPIC_API_KEY, GEMINI_API_KEY, GROQ_API_KEY or OPENAI_API_KEY"
                .to_string(),
        })?;
        let model = if provider.is_none() {
            model.unwrap_or(&current.model)
        } else {
            &current.model
        };
        self.factory.create(&current.provider, Some(model))
    }

    /// Available providers other than `primary`, in priority order.
    #[must_use]
    pub fn alternates(&self, primary: &str) -> Vec<Arc<dyn LlmProvider>> {
        self.factory
            .providers()
            .into_iter()
            .filter(|p| p.available && p.name != primary)
            .filter_map(|p| self.factory.create(&p.name, None).ok())
            .collect()
    }
}
