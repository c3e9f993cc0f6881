use async_trait::async_trait;
use factorlab_core::types::{ChatMessage, LLMResponse};
use factorlab_core::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::client::{build_http_client, ProxySettings};
use crate::Provider;

/// Find the largest byte index <= `max_bytes` that is a valid char boundary.
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// OpenAI-compatible `/chat/completions` client (zhipu, deepseek, kimi, vllm, ...).
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, api_base: Option<&str>, model: &str, max_tokens: u32, temperature: f32) -> Self {
        Self::new_with_proxy(
            api_key,
            api_base,
            model,
            max_tokens,
            temperature,
            &ProxySettings::default(),
            Duration::from_secs(120),
        )
    }

    pub fn new_with_proxy(
        api_key: &str,
        api_base: Option<&str>,
        model: &str,
        max_tokens: u32,
        temperature: f32,
        proxy: &ProxySettings<'_>,
        timeout: Duration,
    ) -> Self {
        let resolved_base = api_base
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string();
        let client = build_http_client(proxy, &resolved_base, timeout);
        Self {
            client,
            api_key: api_key.to_string(),
            api_base: resolved_base,
            model: model.to_string(),
            max_tokens,
            temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, messages: &[ChatMessage]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    async fn send_request(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = self.build_request(messages);

        info!(url = %url, model = %self.model, messages_count = messages.len(), "Calling AI provider");

        let request_body = serde_json::to_string(&request)
            .map_err(|e| Error::Provider(format!("Failed to serialize request: {}", e)))?;
        debug!(body_len = request_body.len(), "Request body prepared");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .body(request_body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "AI provider API error");
            return Err(Error::Provider(format!("API error {}: {}", status, raw_body)));
        }

        parse_chat_response(&raw_body)
    }
}

fn parse_chat_response(raw_body: &str) -> Result<ChatResponse> {
    let end = truncate_at_char_boundary(raw_body, 500);
    debug!(body_len = raw_body.len(), preview = %&raw_body[..end], "AI provider raw response");
    serde_json::from_str(raw_body)
        .map_err(|e| Error::Provider(format!("Failed to parse response: {}. Body: {}", e, &raw_body[..end])))
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

impl ChatResponse {
    fn into_llm_response(self) -> Result<LLMResponse> {
        let usage = self.usage.unwrap_or(Value::Null);
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("No choices in response".to_string()))?;
        let content = choice.message.content.filter(|c| !c.is_empty());
        Ok(LLMResponse {
            content,
            reasoning_content: choice.message.reasoning_content,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse> {
        self.send_request(messages).await?.into_llm_response()
    }
}
