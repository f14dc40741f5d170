use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::adapters::{GenerationAdapter, GenerationOutput, TokenUsage, excerpt};
use crate::error::AdapterError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONFIDENCE: f64 = 0.9;
const DEFAULT_MAX_TOKENS: u64 = 1200;
const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Chat-completions backend.
pub struct OpenAiAdapter {
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// Per-token (input, output) price in USD for a model.
fn cost_per_token(model: &str) -> (Decimal, Decimal) {
    if model.starts_with("gpt-4o-mini") {
        (dec!(0.00000015), dec!(0.0000006))
    } else if model.starts_with("gpt-4o") {
        (dec!(0.0000025), dec!(0.00001))
    } else if model.starts_with("gpt-3.5") {
        (dec!(0.0000005), dec!(0.0000015))
    } else {
        (dec!(0.00001), dec!(0.00003))
    }
}

fn estimate_cost(model: &str, usage: &TokenUsage) -> Decimal {
    let (input, output) = cost_per_token(model);
    input * Decimal::from(usage.prompt_tokens) + output * Decimal::from(usage.completion_tokens)
}

impl OpenAiAdapter {
    pub fn new(base_url: &str, model: &str, api_key: Option<SecretString>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn call(
        &self,
        key: &SecretString,
        prompt: &str,
        model: &str,
        context: &serde_json::Value,
    ) -> Result<ChatResponse, AdapterError> {
        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": context.get("max_tokens").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": context.get("temperature").and_then(|v| v.as_f64()).unwrap_or(DEFAULT_TEMPERATURE),
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key.expose_secret())
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout {
                        backend: "openai".into(),
                        timeout: REQUEST_TIMEOUT,
                    }
                } else {
                    AdapterError::RequestFailed {
                        backend: "openai".into(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::BadStatus {
                backend: "openai".into(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json::<ChatResponse>()
            .await
            .map_err(|e| AdapterError::InvalidResponse {
                backend: "openai".into(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl GenerationAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str, context: &serde_json::Value) -> GenerationOutput {
        let Some(key) = &self.api_key else {
            let err = AdapterError::NotConfigured {
                backend: "openai".into(),
                reason: "OPENAI_API_KEY not set".into(),
            };
            return GenerationOutput::failure(
                format!("[STUB] OpenAI would respond to: {}...", excerpt(prompt, 100)),
                &err,
            );
        };

        let model = context
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.model);

        match self.call(key, prompt, model, context).await {
            Ok(resp) => {
                let usage = resp.usage.unwrap_or_default();
                let tokens = TokenUsage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                };
                let content = resp
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();

                let mut out = GenerationOutput::success(content, CONFIDENCE);
                out.tokens_used = tokens;
                out.estimated_cost = estimate_cost(model, &tokens);
                out.raw = serde_json::json!({"model": model});
                out
            }
            Err(e) => {
                tracing::warn!(model, "OpenAI generation failed: {e}");
                GenerationOutput::failure(format!("OpenAI Error: {e}"), &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_returns_stub_with_error() {
        let adapter = OpenAiAdapter::new("https://api.openai.com/v1", "gpt-4o-mini", None);
        let out = adapter.generate("write a parser", &serde_json::Value::Null).await;
        assert!(out.output.starts_with("[STUB]"));
        assert!(out.is_error());
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn cost_scales_with_tokens() {
        let usage = TokenUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 1_000_000,
            total_tokens: 2_000_000,
        };
        assert_eq!(estimate_cost("gpt-4o-mini", &usage), dec!(0.75));
        assert_eq!(estimate_cost("gpt-4o", &usage), dec!(12.5));
        assert_eq!(estimate_cost("gpt-4o", &TokenUsage::default()), Decimal::ZERO);
    }

    #[test]
    fn chat_response_parses() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"done"}}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
        )
        .unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("done"));
        assert_eq!(resp.usage.unwrap().total_tokens, 4);
    }
}
