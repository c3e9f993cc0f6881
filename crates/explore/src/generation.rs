use factorlab_core::{Error, Result, Variant};
use factorlab_executor::CodeExecutor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::extract::{extract_code, parse_variants};
use crate::prompts::{code_fix_prompt, code_from_description_prompt, exploration_prompt};
use crate::repair::{RepairLoop, RepairOutcome};
use crate::LLMProvider;

/// Input for generating one snippet from a description.
#[derive(Debug, Clone, Default)]
pub struct CodeRequest {
    pub description: String,
    pub pseudocode: String,
    /// Reference implementation shown to the model.
    pub current_code: String,
    /// `+`/`-` line diff of the pseudocode edit, when there was one.
    pub pseudocode_diff: Option<String>,
}

/// Best-effort result of the code-from-description flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeGeneration {
    pub success: bool,
    pub code: String,
    pub error: Option<String>,
    pub traceback: Option<String>,
    /// Fix rounds spent after the first execution.
    pub attempts: u32,
}

/// Drives the AI through generation rounds and the repair loop.
#[derive(Clone)]
pub struct VariantGenerator {
    llm: Arc<dyn LLMProvider>,
    executor: Arc<dyn CodeExecutor>,
    repair: RepairLoop,
    variant_count: usize,
    rounds: u32,
    code_fix_attempts: u32,
}

impl VariantGenerator {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        executor: Arc<dyn CodeExecutor>,
        repair: RepairLoop,
        variant_count: usize,
        rounds: u32,
        code_fix_attempts: u32,
    ) -> Self {
        Self {
            llm,
            executor,
            repair,
            variant_count,
            rounds: rounds.max(1),
            code_fix_attempts,
        }
    }

    /// Up to `rounds` attempts at a validated batch. Variants that never
    /// stabilise are dropped, so fewer than `variant_count` may come back.
    pub async fn generate_variants(&self, content: &str, regenerate: bool) -> Result<Vec<Variant>> {
        let prompt = exploration_prompt(content, regenerate, self.variant_count);
        let mut last_error = String::new();

        for round in 1..=self.rounds {
            info!(round, regenerate, prompt_len = prompt.len(), "📝 [generate] Calling LLM...");
            let response = match self.llm.generate(&prompt).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(round, error = %e, "[generate] LLM call failed");
                    last_error = e.to_string();
                    continue;
                }
            };
            debug!(round, "📝 [generate] Full LLM response:\n{}", response);

            let candidates = match parse_variants(&response, self.variant_count) {
                Ok(v) => v,
                Err(e) => {
                    warn!(round, error = %e, "[generate] Unusable variant payload");
                    last_error = e.to_string();
                    continue;
                }
            };

            let mut accepted = Vec::with_capacity(candidates.len());
            for (index, candidate) in candidates.into_iter().enumerate() {
                match self.repair.validate_and_fix(candidate, content).await? {
                    RepairOutcome::Accepted { variant, .. } => accepted.push(variant),
                    RepairOutcome::Rejected { variant, attempts, reason, .. } => {
                        info!(
                            round,
                            variant_index = index,
                            variant = %variant.name,
                            attempts,
                            reason = %reason,
                            "[generate] Dropping variant"
                        );
                    }
                }
            }

            if !accepted.is_empty() {
                info!(round, accepted = accepted.len(), requested = self.variant_count, "[generate] Batch ready");
                return Ok(accepted);
            }
            last_error = "no variant passed validation".to_string();
            warn!(round, "[generate] Round produced no working variant");
        }

        Err(Error::RepairExhausted(format!(
            "variant generation failed after {} rounds: {}",
            self.rounds, last_error
        )))
    }

    /// Generate, validate, and fix one snippet. Always returns the last code
    /// tried; `success` says whether it ran.
    pub async fn generate_code(&self, request: &CodeRequest) -> Result<CodeGeneration> {
        let prompt = code_from_description_prompt(
            &request.description,
            &request.pseudocode,
            &request.current_code,
            request.pseudocode_diff.as_deref(),
        );
        let response = self.llm.generate(&prompt).await?;
        let mut code = extract_code(&response);

        let fixture = self.repair.fixture();
        let mut result = self.executor.execute(&code, fixture).await?;
        let mut attempts = 0u32;

        while !result.success && attempts < self.code_fix_attempts {
            attempts += 1;
            info!(
                attempt = attempts,
                max = self.code_fix_attempts,
                error = %result.error_message(),
                "[generate_code] Validation failed, fixing"
            );

            let fix = code_fix_prompt(&request.description, &request.pseudocode, &code, &result);
            match self.llm.generate(&fix).await {
                Ok(r) => {
                    let fixed = extract_code(&r);
                    if !fixed.is_empty() {
                        code = fixed;
                    }
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "[generate_code] Fixer call failed");
                    break;
                }
            }
            result = self.executor.execute(&code, fixture).await?;
        }

        Ok(CodeGeneration {
            success: result.success,
            error: if result.success { None } else { result.error.clone() },
            traceback: if result.success { None } else { result.traceback.clone() },
            code,
            attempts,
        })
    }
}
