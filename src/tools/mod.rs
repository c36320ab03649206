//! Pluggable tools invoked by name with structured arguments.
//!
//! Each tool declares a JSON-schema argument contract through
//! [`Tool::definition`] and is registered in a [`ToolRegistry`] under a
//! unique name. Dispatch, argument-size checks and timeouts live in
//! [`crate::agent::executor::ToolExecutor`].

pub mod backends;
pub mod calculator;
pub mod code;
pub mod web_search;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::config::EngineConfig;
use crate::agent::tool::ToolDefinition;
use crate::error::ToolError;

pub use calculator::CalculatorTool;
pub use code::CodeExecutionTool;
pub use web_search::{SearchBackend, WebHit, WebSearchTool};

/// Output of a tool that ran to completion.
///
/// A tool may complete without succeeding (e.g. a script exiting
/// non-zero); the payload then carries whatever partial output exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Whether the tool reports success.
    pub success: bool,
    /// Structured output.
    pub payload: Value,
    /// Failure description when `success` is false.
    pub error: Option<String>,
}

impl ToolOutput {
    /// Successful output.
    #[must_use]
    pub const fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    /// Completed-but-failed output.
    #[must_use]
    pub fn failed(payload: Value, error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload,
            error: Some(error.into()),
        }
    }
}

/// A named capability the engine can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Schema sent to function-calling providers.
    fn definition(&self) -> ToolDefinition;

    /// Runs the tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Argument`] when `arguments` fail validation and
    /// other [`ToolError`] variants when the tool cannot run.
    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError>;
}

/// Deserializes tool arguments into a typed struct.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::argument(tool, e))
}

/// Name → tool registry.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools enabled by `config`.
    ///
    /// The calculator is always present. Code execution is registered even
    /// when disabled so calls fail with [`ToolError::Disabled`] instead of
    /// [`ToolError::NotFound`]. Web search is registered when at least one
    /// backend has credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] if an HTTP client for a search backend cannot
    /// be built.
    pub fn builtin(config: &EngineConfig) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        registry.register(Arc::new(CalculatorTool))?;
        registry.register(Arc::new(CodeExecutionTool::from_config(config)))?;
        if let Some(search) = WebSearchTool::from_config(config)? {
            registry.register(Arc::new(search))?;
        }
        Ok(registry)
    }

    /// Registers a tool under its name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Duplicate`] if the name is taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate { name });
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Returns `true` if a tool is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Definitions of all registered tools.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Definitions for the named subset, skipping unregistered names.
    #[must_use]
    pub fn definitions_for(&self, names: &[&str]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|n| self.tools.get(*n))
            .map(|t| t.definition())
            .collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(Arc::new(CalculatorTool)).is_ok());
        let err = registry.register(Arc::new(CalculatorTool));
        assert!(matches!(err, Err(ToolError::Duplicate { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_definitions_for_skips_unknown() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(CalculatorTool))
            .unwrap_or_else(|_| unreachable!());
        let defs = registry.definitions_for(&["calculator", "execute_code"]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "calculator");
    }

    #[test]
    fn test_parse_args_reports_tool_name() {
        #[derive(serde::Deserialize)]
        struct Args {
            #[allow(dead_code)]
            expression: String,
        }
        let err = parse_args::<Args>("calculator", serde_json::json!({"expr": 1}));
        assert!(matches!(err, Err(ToolError::Argument { ref name, .. }) if name == "calculator"));
    }
}
