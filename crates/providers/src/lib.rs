pub mod client;
pub mod factory;
pub mod openai;

use async_trait::async_trait;
use factorlab_core::types::{ChatMessage, LLMResponse};
use factorlab_core::Result;

/// Chat-completion backend used for variant generation and code repair.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse>;
}

pub use factory::{create_main_provider, create_provider, infer_provider_from_model};
pub use openai::OpenAIProvider;
