//! Tool executor that dispatches tool calls through the [`ToolRegistry`].
//!
//! Every call yields exactly one [`ToolResult`]. Unknown tools, argument
//! errors, execution failures and timeouts all become failed results so a
//! misbehaving tool never aborts the query.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{StreamExt, stream};
use serde_json::Value;
use tracing::{debug, warn};

use super::tool::{ToolCall, ToolResult};
use crate::error::ToolError;
use crate::tools::ToolRegistry;

/// Maximum serialized size of tool arguments.
const MAX_TOOL_ARGS_LEN: usize = 100_000;

/// Runs tool calls with a per-call timeout.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    /// Creates an executor over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// The registry calls are dispatched to.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatches one call.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let result = match self.dispatch(call).await {
            Ok(output) if output.success => ToolResult::success(call, output.payload),
            Ok(output) => ToolResult::failure(
                call,
                output.payload,
                output.error.unwrap_or_else(|| format!("{} failed", call.name)),
            ),
            Err(e) => ToolResult::failure(call, Value::Null, e.to_string()),
        };

        let elapsed_ms = start.elapsed().as_millis();
        if result.success {
            debug!(tool = %call.name, elapsed_ms, "tool call succeeded");
        } else {
            warn!(
                tool = %call.name,
                elapsed_ms,
                error = result.error.as_deref().unwrap_or_default(),
                "tool call failed"
            );
        }
        result
    }

    /// Dispatches `calls` with at most `limit` in flight. Results keep the
    /// order of `calls`.
    pub async fn execute_all(&self, calls: &[ToolCall], limit: usize) -> Vec<ToolResult> {
        let pending: Vec<_> = calls.iter().map(|call| self.execute(call)).collect();
        stream::iter(pending)
            .buffered(limit.max(1))
            .collect()
            .await
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<crate::tools::ToolOutput, ToolError> {
        let size = call.arguments.to_string().len();
        if size > MAX_TOOL_ARGS_LEN {
            return Err(ToolError::argument(
                &call.name,
                format!("arguments too large ({size} bytes, max {MAX_TOOL_ARGS_LEN})"),
            ));
        }

        let tool = self.registry.get(&call.name).ok_or_else(|| ToolError::NotFound {
            name: call.name.clone(),
        })?;

        tokio::time::timeout(self.timeout, tool.execute(call.arguments.clone()))
            .await
            .map_err(|_| ToolError::Timeout {
                name: call.name.clone(),
                after: self.timeout,
            })?
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::agent::tool::ToolDefinition;
    use crate::tools::{CalculatorTool, Tool, ToolOutput};

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".to_string(),
                description: "sleeps".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _arguments: Value) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput::ok(json!({})))
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        let _ = registry.register(Arc::new(CalculatorTool));
        let _ = registry.register(Arc::new(SlowTool));
        ToolExecutor::new(Arc::new(registry), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_success() {
        let call = ToolCall::new("1", "calculator", json!({"expression": "6*7"}));
        let result = executor().execute(&call).await;
        assert!(result.success);
        assert_eq!(result.tool_call_id, "1");
        assert_eq!(result.payload["formatted"], "42");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failed_result() {
        let call = ToolCall::new("2", "teleport", json!({}));
        let result = executor().execute(&call).await;
        assert!(!result.success);
        assert!(result.error.unwrap_or_default().contains("not found"));
    }

    #[tokio::test]
    async fn test_argument_error_is_failed_result() {
        let call = ToolCall::new("3", "calculator", json!({"expr": "1+1"}));
        let result = executor().execute(&call).await;
        assert!(!result.success);
        assert!(result.error.unwrap_or_default().contains("invalid arguments"));
    }

    #[tokio::test]
    async fn test_oversized_arguments_rejected() {
        let call = ToolCall::new("4", "calculator", json!({"expression": "1".repeat(100_001)}));
        let result = executor().execute(&call).await;
        assert!(!result.success);
        assert!(result.error.unwrap_or_default().contains("too large"));
    }

    #[tokio::test]
    async fn test_timeout_is_failed_result_and_order_kept() {
        let calls = vec![
            ToolCall::new("a", "slow", json!({})),
            ToolCall::new("b", "calculator", json!({"expression": "1+1"})),
        ];
        let results = executor().execute_all(&calls, 2).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id, "a");
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap_or_default().contains("timed out"));
        assert!(results[1].success);
    }
}
