use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::Provider;
use crate::router::CompletionRequest;
use crate::upstream;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API (`POST {base}/messages`).
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_error_body_bytes: usize,
}

impl AnthropicClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        timeout: Duration,
        max_error_body_bytes: usize,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            max_error_body_bytes,
        }
    }

    pub async fn complete(
        &self,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<String, LlmError> {
        let url = format!("{}/messages", self.base_url);
        let body = MessagesRequest::from_completion(request);
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let parsed: MessagesResponse =
            upstream::parse_json_response(resp, self.max_error_body_bytes).await?;
        parsed.first_text().ok_or(LlmError::EmptyCompletion {
            provider: Provider::Anthropic,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub system: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub messages: Vec<InputMessage>,
}

impl MessagesRequest {
    pub fn from_completion(request: &CompletionRequest) -> Self {
        Self {
            model: request.model.clone(),
            system: request.system_prompt.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![InputMessage {
                role: "user".to_string(),
                content: request.user_prompt.clone(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InputMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
}

impl MessagesResponse {
    pub fn first_text(self) -> Option<String> {
        self.content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_travels_outside_messages() {
        let request = CompletionRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            system_prompt: "You give constructive critique.".to_string(),
            user_prompt: "Review this note.".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
        };
        let body = serde_json::to_value(MessagesRequest::from_completion(&request)).unwrap();
        assert_eq!(body["system"], "You give constructive critique.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn picks_first_text_block() {
        let raw = r#"{
            "id": "msg_1",
            "type": "message",
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "Looks consistent."}
            ],
            "stop_reason": "end_turn"
        }"#;
        let resp: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.first_text().as_deref(), Some("Looks consistent."));
    }
}
