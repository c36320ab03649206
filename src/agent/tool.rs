//! Tool type definitions for function-calling.
//!
//! Provides provider-agnostic types for tool definitions, calls, and results.
//! A call always yields exactly one result; results are appended to the
//! query trace and never mutated.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool definition that can be sent to an LLM for function-calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the registry key).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub parameters: Value,
}

/// A tool invocation, either planned by the engine or requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Structured arguments.
    pub arguments: Value,
}

impl ToolCall {
    /// Creates a tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The result of executing a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this result corresponds to.
    pub tool_call_id: String,
    /// Name of the tool that ran.
    pub name: String,
    /// Whether the tool completed successfully.
    pub success: bool,
    /// Structured output (may be present on failure, e.g. process output).
    pub payload: Value,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Successful result.
    #[must_use]
    pub fn success(call: &ToolCall, payload: Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success: true,
            payload,
            error: None,
        }
    }

    /// Failed result with an optional partial payload.
    #[must_use]
    pub fn failure(call: &ToolCall, payload: Value, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success: false,
            payload,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_keeps_call_identity() {
        let call = ToolCall::new("step-1", "calculator", json!({"expression": "1/0"}));
        let result = ToolResult::failure(&call, Value::Null, "division by zero");
        assert_eq!(result.tool_call_id, "step-1");
        assert_eq!(result.name, "calculator");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("division by zero"));
    }

    #[test]
    fn test_success_serialization_omits_error() {
        let call = ToolCall::new("c", "calculator", json!({}));
        let result = ToolResult::success(&call, json!({"result": 4}));
        let json = serde_json::to_string(&result).unwrap_or_default();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("\"error\""));
    }
}
