use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: serde_json::Value,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: serde_json::Value::String(content.to_string()),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: serde_json::Value::String(content.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub finish_reason: String,
    pub usage: serde_json::Value,
}

impl Default for LLMResponse {
    fn default() -> Self {
        Self {
            content: None,
            reasoning_content: None,
            finish_reason: String::new(),
            usage: serde_json::Value::Null,
        }
    }
}

/// Instrument + trading day a snippet is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fixture {
    pub code: String,
    pub date: i64,
}

impl Fixture {
    pub const VALIDATION_CODE: &'static str = "000001";
    pub const VALIDATION_DATE: i64 = 20220819;

    pub fn new(code: impl Into<String>, date: i64) -> Self {
        Self { code: code.into(), date }
    }

    /// The acceptance oracle every auto-validated candidate must pass.
    pub fn validation() -> Self {
        Self::new(Self::VALIDATION_CODE, Self::VALIDATION_DATE)
    }
}

impl std::fmt::Display for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.code, self.date)
    }
}

/// One named candidate implementation of a factor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pseudocode: String,
    #[serde(default)]
    pub code: String,
}

impl Variant {
    pub fn with_code(&self, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_validation_constants() {
        let f = Fixture::validation();
        assert_eq!(f.code, "000001");
        assert_eq!(f.date, 20220819);
        assert_eq!(f.to_string(), "000001@20220819");
    }

    #[test]
    fn test_variant_missing_fields_default() {
        let v: Variant = serde_json::from_str(r#"{"name":"a","code":"x"}"#).unwrap();
        assert_eq!(v.pseudocode, "");
        assert_eq!(v.with_code("y").name, "a");
    }
}
