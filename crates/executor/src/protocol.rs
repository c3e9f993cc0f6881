//! Stdout framing between the generated script and the harness.
//!
//! ```text
//! <anything the snippet printed>
//! ___RESULT_START___
//! {"factors": {...}, "keyVariables": {...}, "plotlyData": ..., "finalResult": ...}
//! ___RESULT_END___
//! ```
//!
//! or `___ERROR_START___` / `___ERROR_END___` around `{"error", "type", "traceback"}`.
//! An error block always wins over a result block.

use factorlab_core::{ExecutionResult, FactorValue, FailureKind, Fixture};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

pub const RESULT_START: &str = "___RESULT_START___";
pub const RESULT_END: &str = "___RESULT_END___";
pub const ERROR_START: &str = "___ERROR_START___";
pub const ERROR_END: &str = "___ERROR_END___";

pub const UNPARSABLE_MESSAGE: &str = "无法解析执行结果";

static RESULT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"___RESULT_START___\r?\n([\s\S]*?)\r?\n___RESULT_END___").expect("result block regex is valid")
});
static ERROR_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"___ERROR_START___\r?\n([\s\S]*?)\r?\n___ERROR_END___").expect("error block regex is valid")
});

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    #[serde(default)]
    pub factors: IndexMap<String, FactorValue>,
    #[serde(default)]
    pub key_variables: IndexMap<String, FactorValue>,
    #[serde(default)]
    pub plotly_data: Option<serde_json::Value>,
    #[serde(default)]
    pub final_result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ParsedOutput {
    Result(ResultPayload),
    Error(ErrorPayload),
    /// Reason is for logs only.
    Unparsable(String),
}

pub fn parse_output(stdout: &str) -> ParsedOutput {
    if let Some(caps) = ERROR_BLOCK.captures(stdout) {
        return match serde_json::from_str::<ErrorPayload>(&caps[1]) {
            Ok(p) => ParsedOutput::Error(p),
            Err(e) => ParsedOutput::Unparsable(format!("error block is not valid JSON: {}", e)),
        };
    }
    if let Some(caps) = RESULT_BLOCK.captures(stdout) {
        return match serde_json::from_str::<ResultPayload>(&caps[1]) {
            Ok(p) => ParsedOutput::Result(p),
            Err(e) => ParsedOutput::Unparsable(format!("result block is not valid JSON: {}", e)),
        };
    }
    ParsedOutput::Unparsable("no sentinel block in output".to_string())
}

impl ParsedOutput {
    pub fn into_execution_result(self, fixture: &Fixture) -> ExecutionResult {
        match self {
            ParsedOutput::Result(p) => {
                let mut r = ExecutionResult::succeeded(fixture, p.factors, p.key_variables);
                r.plotly_data = p.plotly_data.filter(|v| !v.is_null());
                r.final_result = p.final_result.filter(|v| !v.is_null());
                r
            }
            ParsedOutput::Error(p) => {
                let kind = if p.error_type.as_deref() == Some("TimeoutError") {
                    FailureKind::Timeout
                } else {
                    FailureKind::Runtime
                };
                ExecutionResult::failed(fixture, kind, p.error, p.error_type, p.traceback)
            }
            ParsedOutput::Unparsable(_) => {
                ExecutionResult::failed(fixture, FailureKind::Unparsable, UNPARSABLE_MESSAGE, None, None)
            }
        }
    }
}
