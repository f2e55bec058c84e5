use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::Provider;
use crate::router::CompletionRequest;
use crate::upstream;

/// Client for OpenAI-compatible `POST {base}/chat/completions` endpoints.
///
/// Serves both OpenAI and xAI Grok; they differ only in base URL and timeout.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    provider: Provider,
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_error_body_bytes: usize,
}

impl ChatCompletionsClient {
    pub fn new(
        provider: Provider,
        http: reqwest::Client,
        base_url: &str,
        timeout: Duration,
        max_error_body_bytes: usize,
    ) -> Self {
        Self {
            provider,
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
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest::from_completion(request);
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: ChatCompletionResponse =
            upstream::parse_json_response(resp, self.max_error_body_bytes).await?;
        parsed.first_text().ok_or(LlmError::EmptyCompletion {
            provider: self.provider,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatCompletionRequest {
    pub fn from_completion(request: &CompletionRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.user_prompt.clone(),
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: Option<String>,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Option<ChatCompletionUsage>,
}

impl ChatCompletionResponse {
    pub fn first_text(self) -> Option<String> {
        self.choices.into_iter().next()?.message.content
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChoice {
    pub index: Option<u32>,
    pub message: ChatCompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionMessage {
    pub role: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You are an FDA 510(k) analyst.".to_string(),
            user_prompt: "Summarize the predicate comparison.".to_string(),
            max_tokens: 12000,
            temperature: 0.2,
        }
    }

    #[test]
    fn request_body_carries_system_then_user_message() {
        let body = serde_json::to_value(ChatCompletionRequest::from_completion(&request())).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 12000);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Summarize the predicate comparison.");
    }

    #[test]
    fn first_choice_content_is_the_completion() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "SE is supported."}, "finish_reason": "stop"},
                {"index": 1, "message": {"role": "assistant", "content": "ignored"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14}
        }"#;
        let resp: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.first_text().as_deref(), Some("SE is supported."));
    }

    #[test]
    fn missing_choices_yield_no_text() {
        let resp: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert_eq!(resp.first_text(), None);
    }
}
