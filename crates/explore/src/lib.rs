//! Exploration engine: turns a factor description into validated code
//! variants, repairs broken candidates against the validation fixture, and
//! keeps every revision in the version store.

pub mod bridge;
pub mod comments;
pub mod extract;
pub mod generation;
pub mod prompts;
pub mod repair;
pub mod service;

use async_trait::async_trait;
use factorlab_core::Result;

/// Prompt in, text out. The only contract the engine needs from an AI.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub use bridge::ProviderLLMBridge;
pub use comments::{CommentSource, InlineComments};
pub use generation::{CodeGeneration, CodeRequest, VariantGenerator};
pub use repair::{RepairLoop, RepairOutcome};
pub use service::{
    CodeGenerationRequest, ExplorationService, ExplorationView, RestoreOutcome, VersionListing,
};
