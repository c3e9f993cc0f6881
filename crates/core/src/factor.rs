//! Typed wire shapes produced by the execution harness.
//!
//! Classification happens once inside the generated script; this side only
//! deserializes the tagged payload.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::Fixture;

/// Summary statistics over non-missing entries only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorStats {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: u64,
}

/// Label-aligned series. `x` and `y` always have the same length; missing
/// values stay in place as `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeriesData {
    pub x: Vec<String>,
    pub y: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DictValue {
    Number(f64),
    Text(String),
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FactorValue {
    Scalar {
        value: Option<f64>,
    },
    Series {
        stats: FactorStats,
        data: SeriesData,
    },
    Array {
        stats: FactorStats,
        data: Vec<Option<f64>>,
    },
    Dict {
        value: IndexMap<String, DictValue>,
    },
}

impl FactorValue {
    /// One-line rendering for CLI listings.
    pub fn summary(&self) -> String {
        match self {
            FactorValue::Scalar { value } => match value {
                Some(v) => format!("{}", v),
                None => "null".to_string(),
            },
            FactorValue::Series { stats, data } => format!(
                "Series[{}] mean={} std={}",
                data.y.len(),
                fmt_opt(stats.mean),
                fmt_opt(stats.std)
            ),
            FactorValue::Array { stats, data } => format!(
                "Array[{}] mean={} std={}",
                data.len(),
                fmt_opt(stats.mean),
                fmt_opt(stats.std)
            ),
            FactorValue::Dict { value } => format!("Dict{{{}}}", value.keys().cloned().collect::<Vec<_>>().join(", ")),
        }
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{:.6}", x)).unwrap_or_else(|| "null".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Wall-clock budget exceeded, either by the in-process alarm or the outer kill.
    Timeout,
    /// The snippet raised.
    Runtime,
    /// No sentinel block could be located or decoded.
    Unparsable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub factors: IndexMap<String, FactorValue>,
    #[serde(default)]
    pub key_variables: IndexMap<String, FactorValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plotly_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub duration_ms: u64,
    pub executed_at: DateTime<Utc>,
    pub fixture_used: Fixture,
}

impl ExecutionResult {
    pub fn succeeded(
        fixture: &Fixture,
        factors: IndexMap<String, FactorValue>,
        key_variables: IndexMap<String, FactorValue>,
    ) -> Self {
        Self {
            success: true,
            factors,
            key_variables,
            ..Self::blank(fixture)
        }
    }

    pub fn failed(
        fixture: &Fixture,
        kind: FailureKind,
        error: impl Into<String>,
        error_type: Option<String>,
        traceback: Option<String>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_type,
            traceback,
            failure_kind: Some(kind),
            ..Self::blank(fixture)
        }
    }

    fn blank(fixture: &Fixture) -> Self {
        Self {
            success: false,
            factors: IndexMap::new(),
            key_variables: IndexMap::new(),
            plotly_data: None,
            final_result: None,
            error: None,
            error_type: None,
            traceback: None,
            failure_kind: None,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            duration_ms: 0,
            executed_at: Utc::now(),
            fixture_used: fixture.clone(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.failure_kind == Some(FailureKind::Timeout)
    }

    /// Error text fed back to the fixer.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}
