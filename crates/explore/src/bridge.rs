use async_trait::async_trait;
use factorlab_core::types::ChatMessage;
use factorlab_core::{Error, Result};
use factorlab_providers::Provider;
use tracing::debug;

use crate::LLMProvider;

const SYSTEM_PROMPT: &str = "你是一位专业的量化研究员，精通 Python、pandas 和 numpy。严格按照要求的格式输出。";

/// Adapter: any chat `Provider` → `LLMProvider`.
pub struct ProviderLLMBridge {
    provider: Box<dyn Provider>,
}

impl ProviderLLMBridge {
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl LLMProvider for ProviderLLMBridge {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let response = self.provider.chat(&messages).await?;
        debug!(
            finish_reason = %response.finish_reason,
            has_reasoning = response.reasoning_content.is_some(),
            "LLM response received"
        );
        match response.content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(Error::Provider("LLM returned empty content".to_string())),
        }
    }
}
