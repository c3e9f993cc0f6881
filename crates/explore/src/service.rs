use chrono_tz::Tz;
use factorlab_core::config::ExploreConfig;
use factorlab_core::{Config, Error, ExecutionResult, Fixture, Paths, Result, Variant};
use factorlab_executor::CodeExecutor;
use factorlab_storage::diff::unified;
use factorlab_storage::{
    format_in_zone, ExplorationStore, Version, VersionDiff, VersionMeta, VersionMetaUpdate,
    VersionSnapshot, VersionStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::comments::CommentSource;
use crate::generation::{CodeGeneration, CodeRequest, VariantGenerator};
use crate::repair::RepairLoop;
use crate::LLMProvider;

/// What a client sees for one comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationView {
    pub is_generated: bool,
    /// Overlay if present, else the AI output.
    pub variants: Vec<Variant>,
    pub original_variants: Vec<Variant>,
    pub is_modified: bool,
    pub fixture: Fixture,
    pub execution_results: BTreeMap<usize, ExecutionResult>,
    pub last_executed_variant: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeGenerationRequest {
    pub comment_id: Option<String>,
    pub variant_index: Option<usize>,
    pub description: String,
    pub pseudocode: String,
    pub current_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListing {
    #[serde(flatten)]
    pub version: Version,
    /// `created_at` in the configured display timezone.
    pub created_at_local: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub updated_variant: Variant,
    pub new_version: Version,
}

/// Façade over generation, execution, and both stores.
#[derive(Clone)]
pub struct ExplorationService {
    config: ExploreConfig,
    tz: Tz,
    executor: Arc<dyn CodeExecutor>,
    comments: Arc<dyn CommentSource>,
    generator: VariantGenerator,
    explorations: Arc<ExplorationStore>,
    versions: Arc<VersionStore>,
}

impl ExplorationService {
    pub fn new(
        config: ExploreConfig,
        llm: Arc<dyn LLMProvider>,
        executor: Arc<dyn CodeExecutor>,
        comments: Arc<dyn CommentSource>,
        explorations: Arc<ExplorationStore>,
        versions: Arc<VersionStore>,
    ) -> Result<Self> {
        let tz: Tz = config
            .display_timezone
            .parse()
            .map_err(|e| Error::Config(format!("invalid displayTimezone: {}", e)))?;
        let repair = RepairLoop::new(llm.clone(), executor.clone(), config.max_repair_attempts);
        let generator = VariantGenerator::new(
            llm,
            executor.clone(),
            repair,
            config.variant_count,
            config.generation_attempts,
            config.code_fix_attempts,
        );
        Ok(Self {
            config,
            tz,
            executor,
            comments,
            generator,
            explorations,
            versions,
        })
    }

    /// Open both stores on the configured database.
    pub fn open(
        config: &Config,
        paths: &Paths,
        llm: Arc<dyn LLMProvider>,
        executor: Arc<dyn CodeExecutor>,
        comments: Arc<dyn CommentSource>,
    ) -> Result<Self> {
        let db_path = config.db_path(paths);
        info!(db = %db_path.display(), "Opening exploration database");
        let explorations = Arc::new(ExplorationStore::open(&db_path)?);
        let versions = Arc::new(VersionStore::open(&db_path)?);
        Self::new(config.explore.clone(), llm, executor, comments, explorations, versions)
    }

    pub fn config(&self) -> &ExploreConfig {
        &self.config
    }

    pub fn get(&self, comment_id: &str) -> Result<ExplorationView> {
        let view = match self.explorations.get(comment_id)? {
            Some(record) => ExplorationView {
                is_generated: true,
                variants: record.live_variants().to_vec(),
                is_modified: record.is_modified(),
                fixture: record.effective_fixture(),
                original_variants: record.variants,
                execution_results: record.execution_results,
                last_executed_variant: record.last_executed_variant,
            },
            None => ExplorationView {
                is_generated: false,
                variants: Vec::new(),
                original_variants: Vec::new(),
                is_modified: false,
                fixture: self.config.default_fixture.clone(),
                execution_results: BTreeMap::new(),
                last_executed_variant: None,
            },
        };
        Ok(view)
    }

    pub async fn generate(&self, comment_id: &str, text_override: Option<&str>) -> Result<ExplorationView> {
        self.generate_inner(comment_id, text_override, false).await
    }

    /// Like `generate` but asks for different ideas; drops the overlay and cached results.
    pub async fn regenerate(&self, comment_id: &str, text_override: Option<&str>) -> Result<ExplorationView> {
        self.generate_inner(comment_id, text_override, true).await
    }

    async fn generate_inner(
        &self,
        comment_id: &str,
        text_override: Option<&str>,
        regenerate: bool,
    ) -> Result<ExplorationView> {
        let content = self.resolve_content(comment_id, text_override).await?;
        info!(comment_id = %comment_id, regenerate, "Generating exploration variants");

        let variants = self.generator.generate_variants(&content, regenerate).await?;
        let fixture = match self.explorations.get(comment_id)? {
            Some(existing) => existing.default_fixture,
            None => self.config.default_fixture.clone(),
        };
        self.explorations
            .upsert_variants(comment_id, &content, &variants, &fixture)?;
        self.get(comment_id)
    }

    /// Comment must exist; an override only replaces its text. Blank text is
    /// refused before anything expensive runs.
    async fn resolve_content(&self, comment_id: &str, text_override: Option<&str>) -> Result<String> {
        let stored = self
            .comments
            .comment_content(comment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("comment {}", comment_id)))?;

        let content = match text_override {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => stored,
        };
        if content.trim().is_empty() {
            return Err(Error::Validation("评论内容为空，无法生成探索方案".to_string()));
        }
        Ok(content)
    }

    /// Replace the overlay wholesale. Count must match the record's.
    pub fn save_variants(&self, comment_id: &str, variants: &[Variant]) -> Result<ExplorationView> {
        let record = self.explorations.require(comment_id)?;
        if variants.len() != record.variants.len() {
            return Err(Error::Validation(format!(
                "expected {} variants, got {}",
                record.variants.len(),
                variants.len()
            )));
        }
        self.explorations.save_overlay(comment_id, variants)?;
        info!(comment_id = %comment_id, "Saved user-modified variants");
        self.get(comment_id)
    }

    pub async fn execute(&self, code: &str, fixture: &Fixture) -> Result<ExecutionResult> {
        if code.trim().is_empty() {
            return Err(Error::Validation("缺少代码".to_string()));
        }
        self.executor.execute(code, fixture).await
    }

    /// Run a live variant (or `code_override`) and cache the result for its index.
    pub async fn execute_variant(
        &self,
        comment_id: &str,
        variant_index: usize,
        fixture: Option<Fixture>,
        code_override: Option<&str>,
    ) -> Result<ExecutionResult> {
        let record = self.explorations.require(comment_id)?;
        let variant = record
            .live_variant(variant_index)
            .ok_or_else(|| Error::Validation(format!("variant index {} out of range", variant_index)))?;
        let code = code_override.unwrap_or(&variant.code);
        let fixture = fixture.unwrap_or_else(|| record.effective_fixture());

        let result = self.execute(code, &fixture).await?;
        info!(
            comment_id = %comment_id,
            variant_index,
            fixture = %fixture,
            success = result.success,
            duration_ms = result.duration_ms,
            "Executed variant"
        );
        self.explorations.store_result(comment_id, variant_index, &result)?;
        Ok(result)
    }

    pub async fn generate_code(&self, request: &CodeGenerationRequest) -> Result<CodeGeneration> {
        if request.description.trim().is_empty() || request.pseudocode.trim().is_empty() {
            return Err(Error::Validation("description and pseudocode are required".to_string()));
        }

        let target = match (&request.comment_id, request.variant_index) {
            (Some(c), Some(i)) => Some((c.as_str(), i)),
            _ => None,
        };
        let live = match target {
            Some((comment_id, index)) => self
                .explorations
                .get(comment_id)?
                .and_then(|r| r.live_variant(index).cloned()),
            None => None,
        };

        let pseudocode_diff = live
            .as_ref()
            .filter(|v| !v.pseudocode.trim().is_empty() && v.pseudocode != request.pseudocode)
            .map(|v| unified(&v.pseudocode, &request.pseudocode))
            .filter(|d| !d.is_empty());
        let current_code = request
            .current_code
            .clone()
            .or_else(|| live.as_ref().map(|v| v.code.clone()))
            .unwrap_or_default();

        let generation = self
            .generator
            .generate_code(&CodeRequest {
                description: request.description.clone(),
                pseudocode: request.pseudocode.clone(),
                current_code,
                pseudocode_diff,
            })
            .await?;
        info!(success = generation.success, attempts = generation.attempts, "Generated code from description");

        if let (Some((comment_id, index)), Some(live)) = (target, live) {
            let updated = Variant {
                name: live.name,
                description: request.description.clone(),
                pseudocode: request.pseudocode.clone(),
                code: generation.code.clone(),
            };
            if let Err(e) = self.explorations.update_live_variant(comment_id, index, updated) {
                warn!(comment_id = %comment_id, variant_index = index, error = %e, "Failed to update overlay");
            }
        }

        Ok(generation)
    }

    // ---- versions ----

    /// Snapshot the live variant, or an explicit `snapshot`.
    pub fn create_version(
        &self,
        comment_id: &str,
        variant_index: usize,
        snapshot: Option<VersionSnapshot>,
        meta: &VersionMeta,
    ) -> Result<(Version, usize)> {
        let snapshot = match snapshot {
            Some(s) => s,
            None => {
                let record = self.explorations.require(comment_id)?;
                let live = record.live_variant(variant_index).ok_or_else(|| {
                    Error::Validation(format!("variant index {} out of range", variant_index))
                })?;
                VersionSnapshot::from(live)
            }
        };
        if snapshot.code.trim().is_empty() {
            return Err(Error::Validation("cannot version empty code".to_string()));
        }
        self.versions
            .create(comment_id, variant_index, &snapshot, meta, self.config.version_keep)
    }

    pub fn list_versions(&self, comment_id: &str, variant_index: usize) -> Result<Vec<VersionListing>> {
        Ok(self
            .versions
            .list(comment_id, variant_index)?
            .into_iter()
            .map(|version| VersionListing {
                created_at_local: format_in_zone(&version.created_at, &self.tz),
                version,
            })
            .collect())
    }

    pub fn get_version(&self, id: i64) -> Result<Version> {
        self.versions.require(id)
    }

    pub fn display_time(&self, version: &Version) -> String {
        version.created_at_in(&self.tz)
    }

    pub fn update_version_meta(&self, id: i64, update: &VersionMetaUpdate) -> Result<Version> {
        self.versions.update_meta(id, update)
    }

    pub fn delete_version(&self, id: i64) -> Result<()> {
        self.versions.delete(id)
    }

    pub fn diff_versions(&self, old_id: i64, new_id: i64) -> Result<VersionDiff> {
        self.versions.diff(old_id, new_id)
    }

    /// Put an old snapshot back on the live variant and record that as a new version.
    pub fn restore_version(&self, id: i64, created_by: Option<String>) -> Result<RestoreOutcome> {
        let version = self.versions.require(id)?;
        let record = self.explorations.require(&version.comment_id)?;
        let live = record.live_variant(version.variant_index).ok_or_else(|| {
            Error::Validation(format!("variant index {} out of range", version.variant_index))
        })?;

        let updated_variant = version.snapshot.apply_to(live);
        let overlay = record.with_live_variant(version.variant_index, updated_variant.clone())?;
        self.explorations.save_overlay(&version.comment_id, &overlay)?;

        let meta = VersionMeta {
            note: Some(format!("从版本 #{} 恢复", id)),
            tags: Vec::new(),
            is_important: false,
            created_by,
        };
        // 恢复不触发清理，否则满额时会删掉被恢复的版本
        let new_version = self.versions.append(
            &version.comment_id,
            version.variant_index,
            &version.snapshot,
            &meta,
        )?;
        info!(
            restored_from = id,
            version_id = new_version.id,
            comment_id = %version.comment_id,
            variant_index = version.variant_index,
            "Restored version"
        );

        Ok(RestoreOutcome {
            updated_variant,
            new_version,
        })
    }

    pub fn cleanup_versions(&self, comment_id: &str, variant_index: usize, keep: Option<usize>) -> Result<usize> {
        self.versions
            .cleanup(comment_id, variant_index, keep.unwrap_or(self.config.version_keep))
    }
}
