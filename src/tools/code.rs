//! Single-shot code execution in a child interpreter.
//!
//! Runs python, javascript or bash snippets via `-c`/`-e` with stdin
//! closed, a scratch working directory, an enforced deadline and an output
//! cap. The child is spawned with `kill_on_drop`, so a timeout or a
//! cancelled query terminates it.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use super::{Tool, ToolOutput, parse_args};
use crate::agent::config::EngineConfig;
use crate::agent::tool::ToolDefinition;
use crate::core::truncate_chars;
use crate::error::ToolError;

/// Registry name of the code execution tool.
pub const TOOL_NAME: &str = "execute_code";

/// Maximum accepted source length in bytes.
const MAX_CODE_LEN: usize = 20_000;

/// Interpreter a snippet is run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// `python3 -c`.
    #[default]
    Python,
    /// `node -e`.
    #[serde(alias = "js", alias = "node")]
    Javascript,
    /// `bash -c`.
    #[serde(alias = "sh", alias = "shell")]
    Bash,
}

impl Language {
    const fn program(self) -> (&'static str, &'static str) {
        match self {
            Self::Python => ("python3", "-c"),
            Self::Javascript => ("node", "-e"),
            Self::Bash => ("bash", "-c"),
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Bash => "bash",
        }
    }
}

#[derive(Deserialize)]
struct Args {
    code: String,
    #[serde(default)]
    language: Language,
}

/// Sandboxed code execution tool.
#[derive(Debug, Clone)]
pub struct CodeExecutionTool {
    enabled: bool,
    timeout: Duration,
    max_output: usize,
}

impl CodeExecutionTool {
    /// Creates the tool with explicit limits.
    #[must_use]
    pub const fn new(enabled: bool, timeout: Duration, max_output: usize) -> Self {
        Self {
            enabled,
            timeout,
            max_output,
        }
    }

    /// Creates the tool from engine configuration.
    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.code_execution_enabled,
            config.code_timeout,
            config.code_output_limit,
        )
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_NAME.to_string(),
            description: format!(
                "Run a short python, javascript or bash program and return its stdout and \
                 stderr. Execution is limited to {} seconds; output is truncated to {} \
                 characters. Print the values you need.",
                self.timeout.as_secs(),
                self.max_output
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Source code to execute."
                    },
                    "language": {
                        "type": "string",
                        "enum": ["python", "javascript", "bash"],
                        "description": "Interpreter to use (default: python)."
                    }
                },
                "required": ["code"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        if !self.enabled {
            return Err(ToolError::Disabled {
                name: TOOL_NAME.to_string(),
            });
        }

        let args: Args = parse_args(TOOL_NAME, arguments)?;
        if args.code.trim().is_empty() {
            return Err(ToolError::argument(TOOL_NAME, "code must not be empty"));
        }
        if args.code.len() > MAX_CODE_LEN {
            return Err(ToolError::argument(
                TOOL_NAME,
                format!("code too long ({} bytes, max {MAX_CODE_LEN})", args.code.len()),
            ));
        }

        let (program, flag) = args.language.program();
        debug!(language = args.language.as_str(), bytes = args.code.len(), "executing code");

        let mut child = Command::new(program)
            .arg(flag)
            .arg(&args.code)
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::execution(TOOL_NAME, format!("cannot start {program}: {e}")))?;

        // A char is at most 4 bytes, so this always holds max_output chars.
        let cap = self.max_output.saturating_mul(4);
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let run = async {
            tokio::try_join!(
                read_capped(stdout_pipe, cap),
                read_capped(stderr_pipe, cap),
                child.wait()
            )
        };
        let ((stdout, stdout_dropped), (stderr, stderr_dropped), status) =
            match tokio::time::timeout(self.timeout, run).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(ToolError::execution(TOOL_NAME, e)),
                Err(_) => {
                    return Err(ToolError::Timeout {
                        name: TOOL_NAME.to_string(),
                        after: self.timeout,
                    });
                }
            };

        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);
        let (stdout, stdout_truncated) = truncate_chars(&stdout, self.max_output);
        let (stderr, stderr_truncated) = truncate_chars(&stderr, self.max_output);
        let exit_code = status.code();

        let payload = json!({
            "language": args.language.as_str(),
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
            "truncated": stdout_truncated || stderr_truncated || stdout_dropped || stderr_dropped,
        });

        if status.success() {
            Ok(ToolOutput::ok(payload))
        } else {
            let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            Ok(ToolOutput::failed(payload, format!("process exited with {code}")))
        }
    }
}

/// Keeps the first `cap` bytes of a pipe and discards the rest, so the child
/// never blocks on a full pipe. Returns whether anything was discarded.
async fn read_capped<R>(pipe: Option<R>, cap: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok((Vec::new(), false));
    };
    let mut kept = Vec::new();
    (&mut pipe)
        .take(u64::try_from(cap).unwrap_or(u64::MAX))
        .read_to_end(&mut kept)
        .await?;
    let discarded = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;
    Ok((kept, discarded > 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> CodeExecutionTool {
        CodeExecutionTool::new(true, Duration::from_secs(5), 50)
    }

    #[tokio::test]
    async fn test_disabled_tool_refuses() {
        let tool = CodeExecutionTool::new(false, Duration::from_secs(1), 100);
        let err = tool.execute(json!({"code": "echo hi", "language": "bash"})).await;
        assert!(matches!(err, Err(ToolError::Disabled { .. })));
    }

    #[tokio::test]
    async fn test_rejects_empty_code() {
        let err = tool().execute(json!({"code": "   "})).await;
        assert!(matches!(err, Err(ToolError::Argument { .. })));
    }

    #[tokio::test]
    async fn test_rejects_unknown_language() {
        let err = tool()
            .execute(json!({"code": "puts 1", "language": "ruby"}))
            .await;
        assert!(matches!(err, Err(ToolError::Argument { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bash_success_and_truncation() {
        let output = tool()
            .execute(json!({"code": "printf 'x%.0s' $(seq 1 200)", "language": "bash"}))
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(output.success);
        assert_eq!(output.payload["truncated"], true);
        assert_eq!(output.payload["stdout"].as_str().map(str::len), Some(50));
    }

    #[tokio::test]
    async fn test_read_capped_keeps_only_the_cap() {
        let (kept, discarded) = read_capped(Some(&b"abcdefgh"[..]), 3)
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(kept, b"abc");
        assert!(discarded);

        let (kept, discarded) = read_capped(Some(&b"ab"[..]), 3)
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(kept, b"ab");
        assert!(!discarded);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_output_is_capped_while_reading() {
        let output = tool()
            .execute(json!({
                "code": "head -c 20000000 /dev/zero | tr '\\0' x",
                "language": "bash"
            }))
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(output.success);
        assert_eq!(output.payload["truncated"], true);
        assert_eq!(output.payload["stdout"].as_str().map(str::len), Some(50));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let output = tool()
            .execute(json!({"code": "echo oops >&2; exit 3", "language": "bash"}))
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(!output.success);
        assert_eq!(output.payload["exit_code"], 3);
        assert!(output.payload["stderr"].as_str().is_some_and(|s| s.contains("oops")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let tool = CodeExecutionTool::new(true, Duration::from_millis(200), 100);
        let err = tool
            .execute(json!({"code": "sleep 5", "language": "bash"}))
            .await;
        assert!(matches!(err, Err(ToolError::Timeout { .. })));
    }
}
