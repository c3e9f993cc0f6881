use async_trait::async_trait;
use factorlab_core::{Config, Error, Paths};
use factorlab_executor::PythonHarness;
use factorlab_explore::{ExplorationService, InlineComments, LLMProvider, ProviderLLMBridge};
use factorlab_providers::create_main_provider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Stands in when no provider has a key, so offline commands still work.
struct UnconfiguredLLM {
    reason: String,
}

#[async_trait]
impl LLMProvider for UnconfiguredLLM {
    async fn generate(&self, _prompt: &str) -> factorlab_core::Result<String> {
        Err(Error::Provider(format!("no AI provider available: {}", self.reason)))
    }
}

pub struct CliContext {
    pub paths: Paths,
    pub config: Config,
}

impl CliContext {
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let paths = Paths::new();
        let config = match config_path {
            Some(p) => Config::load(p)?,
            None => Config::load_or_default(&paths)?,
        };
        Ok(Self { paths, config })
    }

    pub fn comments_file(&self) -> PathBuf {
        self.paths.workspace().join("comments.json")
    }

    pub fn harness(&self) -> PythonHarness {
        PythonHarness::from_config(&self.config.executor)
    }

    /// `comment_id`/`text` registers an ad-hoc comment on top of `comments.json`.
    pub async fn service(&self, seed: Option<(&str, &str)>) -> anyhow::Result<ExplorationService> {
        self.paths.ensure_dirs()?;

        let comments_file = self.comments_file();
        let comments = if comments_file.exists() {
            InlineComments::load(&comments_file)?
        } else {
            InlineComments::new()
        };
        if let Some((comment_id, text)) = seed {
            comments.insert(comment_id, text).await;
        }

        let llm: Arc<dyn LLMProvider> = match create_main_provider(&self.config) {
            Ok(provider) => Arc::new(ProviderLLMBridge::new(provider)),
            Err(e) => {
                debug!(error = %e, "AI provider unavailable");
                Arc::new(UnconfiguredLLM { reason: e.to_string() })
            }
        };

        let harness = self.harness();
        if let Err(e) = harness.check_interpreter() {
            warn!(error = %e, "Python interpreter check failed");
        }

        Ok(ExplorationService::open(
            &self.config,
            &self.paths,
            llm,
            Arc::new(harness),
            Arc::new(comments),
        )?)
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
