use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::adapters::{GenerationAdapter, GenerationOutput, excerpt};
use crate::error::AdapterError;

/// Default command timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Stderr kept in the raw diagnostics.
const STDERR_EXCERPT: usize = 200;

/// Wraps any command-line tool as a generation backend.
pub struct CliAdapter {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CliAdapter {
    /// `command` is split on whitespace; the prompt is appended as the last argument.
    pub fn new(command: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "echo".to_string());
        Self {
            program,
            args: parts.collect(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, prompt: &str, timeout: Duration) -> Result<std::process::Output, AdapterError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AdapterError::RequestFailed {
                backend: "cli".into(),
                reason: format!("Failed to spawn {}: {e}", self.program),
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(AdapterError::RequestFailed {
                backend: "cli".into(),
                reason: format!("Command execution failed: {e}"),
            }),
            Err(_) => Err(AdapterError::Timeout {
                backend: "cli".into(),
                timeout,
            }),
        }
    }
}

#[async_trait]
impl GenerationAdapter for CliAdapter {
    fn name(&self) -> &str {
        "cli"
    }

    async fn generate(&self, prompt: &str, context: &serde_json::Value) -> GenerationOutput {
        let timeout = context
            .get("timeout")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        match self.run(prompt, timeout).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let code = output.status.code().unwrap_or(-1);
                let ok = output.status.success();

                let mut out = GenerationOutput::success(
                    if ok { stdout } else { stderr.trim().to_string() },
                    if ok { 1.0 } else { 0.0 },
                );
                out.raw = serde_json::json!({
                    "returncode": code,
                    "stderr": excerpt(&stderr, STDERR_EXCERPT),
                });
                out
            }
            Err(e @ AdapterError::Timeout { .. }) => {
                GenerationOutput::failure("CLI command timed out", &e)
            }
            Err(e) => GenerationOutput::failure(format!("CLI Error: {e}"), &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_prompt_with_full_confidence() {
        let adapter = CliAdapter::new("echo");
        let out = adapter.generate("hello fleet", &serde_json::Value::Null).await;
        assert_eq!(out.output, "hello fleet");
        assert_eq!(out.confidence, 1.0);
        assert!(!out.is_error());
        assert_eq!(out.raw["returncode"], 0);
    }

    #[tokio::test]
    async fn nonzero_exit_has_zero_confidence() {
        let adapter = CliAdapter::new("false");
        let out = adapter.generate("anything", &serde_json::Value::Null).await;
        assert_eq!(out.confidence, 0.0);
        assert_eq!(out.raw["returncode"], 1);
    }

    #[tokio::test]
    async fn command_timeout() {
        let adapter = CliAdapter::new("sleep").with_timeout(Duration::from_millis(100));
        let out = adapter.generate("10", &serde_json::Value::Null).await;
        assert!(out.is_error());
        assert_eq!(out.output, "CLI command timed out");
    }

    #[tokio::test]
    async fn missing_program_is_folded_into_output() {
        let adapter = CliAdapter::new("definitely-not-a-real-binary-xyz");
        let out = adapter.generate("x", &serde_json::Value::Null).await;
        assert!(out.is_error());
        assert!(out.output.starts_with("CLI Error"));
    }
}
