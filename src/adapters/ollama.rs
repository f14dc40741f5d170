use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapters::{GenerationAdapter, GenerationOutput, TokenUsage};
use crate::error::AdapterError;

const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);
const CONFIDENCE: f64 = 0.8;

/// Local models served by Ollama.
pub struct OllamaAdapter {
    host: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

impl OllamaAdapter {
    pub fn new(host: &str, model: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, prompt: &str, model: &str) -> Result<GenerateResponse, AdapterError> {
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });

        let resp = self
            .client
            .post(format!("{}/api/generate", self.host))
            .timeout(GENERATE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout {
                        backend: "ollama".into(),
                        timeout: GENERATE_TIMEOUT,
                    }
                } else {
                    AdapterError::RequestFailed {
                        backend: "ollama".into(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::BadStatus {
                backend: "ollama".into(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json::<GenerateResponse>()
            .await
            .map_err(|e| AdapterError::InvalidResponse {
                backend: "ollama".into(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl GenerationAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, context: &serde_json::Value) -> GenerationOutput {
        let model = context
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.model);

        match self.call(prompt, model).await {
            Ok(resp) => {
                let mut out = GenerationOutput::success(resp.response, CONFIDENCE);
                out.explanation = Some("Ollama adapter output".to_string());
                out.tokens_used = TokenUsage {
                    prompt_tokens: resp.prompt_eval_count,
                    completion_tokens: resp.eval_count,
                    total_tokens: resp.prompt_eval_count + resp.eval_count,
                };
                out.raw = serde_json::json!({"model": model});
                out
            }
            Err(e) => {
                tracing::warn!(model, "Ollama generation failed: {e}");
                GenerationOutput::failure("", &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_is_folded_into_output() {
        // Port 9 (discard) on localhost is not an HTTP server.
        let adapter = OllamaAdapter::new("http://127.0.0.1:9", "llama3");
        let out = adapter.generate("hello", &serde_json::Value::Null).await;
        assert!(out.is_error());
        assert_eq!(out.confidence, 0.0);
        assert!(out.output.is_empty());
    }

    #[test]
    fn response_tolerates_missing_counters() {
        let resp: GenerateResponse = serde_json::from_str(r#"{"response":"hi"}"#).unwrap();
        assert_eq!(resp.response, "hi");
        assert_eq!(resp.eval_count, 0);
    }
}
