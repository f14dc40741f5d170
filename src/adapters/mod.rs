//! Generation adapters.
//!
//! Supports:
//! - **ollama**: local models over the Ollama HTTP API
//! - **openai**: chat completions over HTTP
//! - **cli**: any command, with the prompt appended as the last argument
//! - **stub**: deterministic echo for tests and dry runs
//!
//! The backend is chosen once at worker startup. Adapters never return an
//! error: failures are folded into [`GenerationOutput`] with zero confidence
//! and a populated `error`.

mod cli;
mod ollama;
mod openai;
mod stub;

pub use cli::CliAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
pub use stub::StubAdapter;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// Supported generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Ollama,
    OpenAi,
    Cli,
    Stub,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Cli => "cli",
            Self::Stub => "stub",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            "cli" => Ok(Self::Cli),
            "stub" => Ok(Self::Stub),
            other => Err(format!(
                "unknown model backend '{other}' (expected ollama, openai, cli or stub)"
            )),
        }
    }
}

/// Configuration for creating a generation adapter.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub backend: Backend,
    pub ollama_host: String,
    pub ollama_model: String,
    pub openai_api_key: Option<secrecy::SecretString>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub cli_command: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Stub,
            ollama_host: "http://localhost:11434".to_string(),
            ollama_model: "llama3".to_string(),
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            cli_command: "echo".to_string(),
        }
    }
}

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Result of one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub output: String,
    pub explanation: Option<String>,
    pub tokens_used: TokenUsage,
    pub estimated_cost: Decimal,
    pub confidence: f64,
    /// Backend-specific diagnostics.
    pub raw: serde_json::Value,
    pub error: Option<String>,
}

impl GenerationOutput {
    pub fn success(output: impl Into<String>, confidence: f64) -> Self {
        Self {
            output: output.into(),
            explanation: None,
            tokens_used: TokenUsage::default(),
            estimated_cost: Decimal::ZERO,
            confidence,
            raw: serde_json::Value::Null,
            error: None,
        }
    }

    /// Fold an adapter error into a zero-confidence output.
    pub fn failure(output: impl Into<String>, error: &AdapterError) -> Self {
        Self {
            confidence: 0.0,
            error: Some(error.to_string()),
            ..Self::success(output, 0.0)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Produce output from a prompt and a context map.
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    /// Backend name, used as the registration kind.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, context: &serde_json::Value) -> GenerationOutput;
}

/// Create a generation adapter from configuration.
pub fn create_adapter(config: &AdapterConfig) -> Arc<dyn GenerationAdapter> {
    match config.backend {
        Backend::Ollama => {
            tracing::info!(host = %config.ollama_host, model = %config.ollama_model, "Using Ollama");
            Arc::new(OllamaAdapter::new(&config.ollama_host, &config.ollama_model))
        }
        Backend::OpenAi => {
            tracing::info!(model = %config.openai_model, "Using OpenAI");
            Arc::new(OpenAiAdapter::new(
                &config.openai_base_url,
                &config.openai_model,
                config.openai_api_key.clone(),
            ))
        }
        Backend::Cli => {
            tracing::info!(command = %config.cli_command, "Using CLI adapter");
            Arc::new(CliAdapter::new(&config.cli_command))
        }
        Backend::Stub => {
            tracing::info!("Using stub adapter");
            Arc::new(StubAdapter)
        }
    }
}

/// First `max` characters of `s` (UTF-8 safe).
pub(crate) fn excerpt(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
