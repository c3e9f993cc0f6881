use factorlab_core::{ExecutionResult, Fixture, Result, Variant};
use factorlab_executor::CodeExecutor;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::extract::extract_code;
use crate::prompts::fix_prompt;
use crate::LLMProvider;

/// Terminal state of one variant's validate/repair run.
#[derive(Debug, Clone)]
pub enum RepairOutcome {
    /// Executed cleanly against the fixture.
    Accepted {
        variant: Variant,
        attempts: u32,
        result: ExecutionResult,
    },
    /// Never stabilised; `variant` is the last code tried.
    Rejected {
        variant: Variant,
        attempts: u32,
        last_result: ExecutionResult,
        reason: String,
    },
}

impl RepairOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RepairOutcome::Accepted { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RepairOutcome::Accepted { attempts, .. } | RepairOutcome::Rejected { attempts, .. } => *attempts,
        }
    }

    pub fn into_accepted(self) -> Option<Variant> {
        match self {
            RepairOutcome::Accepted { variant, .. } => Some(variant),
            RepairOutcome::Rejected { .. } => None,
        }
    }
}

/// Testing → Accepted, or Testing → Repairing → Testing ... → Rejected.
///
/// Each test is a fresh harness run against `fixture`. A variant is only
/// accepted after it actually ran; the fixer's word is never enough.
#[derive(Clone)]
pub struct RepairLoop {
    llm: Arc<dyn LLMProvider>,
    executor: Arc<dyn CodeExecutor>,
    fixture: Fixture,
    max_attempts: u32,
}

impl RepairLoop {
    pub fn new(llm: Arc<dyn LLMProvider>, executor: Arc<dyn CodeExecutor>, max_attempts: u32) -> Self {
        Self {
            llm,
            executor,
            fixture: Fixture::validation(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn with_fixture(mut self, fixture: Fixture) -> Self {
        self.fixture = fixture;
        self
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    /// `attempts` counts executions. Only harness infrastructure errors
    /// surface as `Err`.
    pub async fn validate_and_fix(&self, variant: Variant, description: &str) -> Result<RepairOutcome> {
        let mut current = variant;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = self.executor.execute(&current.code, &self.fixture).await?;

            if result.success {
                info!(variant = %current.name, attempts, "✅ [repair] Variant validated");
                return Ok(RepairOutcome::Accepted {
                    variant: current,
                    attempts,
                    result,
                });
            }

            info!(
                variant = %current.name,
                attempt = attempts,
                error = %result.error_message(),
                timeout = result.is_timeout(),
                "[repair] Execution failed"
            );

            if attempts >= self.max_attempts {
                let reason = format!("repair limit reached after {} executions", attempts);
                return Ok(self.reject(current, attempts, result, reason));
            }

            let prompt = fix_prompt(description, &current, &result);
            debug!(variant = %current.name, prompt_len = prompt.len(), "🔧 [repair] Calling fixer");
            let fixed = match self.llm.generate(&prompt).await {
                Ok(response) => extract_code(&response),
                Err(e) => {
                    let reason = format!("fixer call failed: {}", e);
                    return Ok(self.reject(current, attempts, result, reason));
                }
            };

            if fixed.is_empty() {
                return Ok(self.reject(current, attempts, result, "fixer returned no code".to_string()));
            }
            if fixed == current.code.trim() {
                return Ok(self.reject(current, attempts, result, "fixer returned unchanged code".to_string()));
            }

            current = current.with_code(fixed);
        }
    }

    fn reject(&self, variant: Variant, attempts: u32, last_result: ExecutionResult, reason: String) -> RepairOutcome {
        warn!(variant = %variant.name, attempts, reason = %reason, "❌ [repair] Variant rejected");
        RepairOutcome::Rejected {
            variant,
            attempts,
            last_result,
            reason,
        }
    }
}
