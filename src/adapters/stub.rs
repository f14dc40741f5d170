use async_trait::async_trait;

use crate::adapters::{GenerationAdapter, GenerationOutput, excerpt};

/// Deterministic adapter that echoes the prompt back.
pub struct StubAdapter;

#[async_trait]
impl GenerationAdapter for StubAdapter {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, prompt: &str, _context: &serde_json::Value) -> GenerationOutput {
        let mut out = GenerationOutput::success(
            format!("[STUB] Response to: {}", excerpt(prompt, 200)),
            0.9,
        );
        out.explanation = Some("Stub adapter output".to_string());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_is_deterministic() {
        let a = StubAdapter.generate("build the thing", &serde_json::Value::Null).await;
        let b = StubAdapter.generate("build the thing", &serde_json::Value::Null).await;
        assert_eq!(a.output, b.output);
        assert!(a.output.contains("build the thing"));
        assert!(!a.is_error());
    }
}
