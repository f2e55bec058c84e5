use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::Provider;
use crate::router::CompletionRequest;
use crate::upstream;

/// Client for the Gemini `models/{model}:generateContent` REST endpoint.
///
/// Gemini receives a single user turn: the system prompt and the user prompt
/// joined by a blank line.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_error_body_bytes: usize,
}

impl GeminiClient {
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
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let body = GenerateContentRequest::from_completion(request);
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: GenerateContentResponse =
            upstream::parse_json_response(resp, self.max_error_body_bytes).await?;
        parsed.text().ok_or(LlmError::EmptyCompletion {
            provider: Provider::Gemini,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    pub fn from_completion(request: &CompletionRequest) -> Self {
        let prompt = format!(
            "{}\n\n{}",
            request.system_prompt.trim(),
            request.user_prompt.trim()
        );
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt) }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    /// Text parts of the first candidate, concatenated.
    pub fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_joins_system_and_user_with_blank_line() {
        let request = CompletionRequest {
            model: "gemini-2.5-flash".to_string(),
            system_prompt: "  You convert PDF-extracted text into clean markdown. ".to_string(),
            user_prompt: "page one\n".to_string(),
            max_tokens: 4000,
            temperature: 0.0,
        };
        let body = serde_json::to_value(GenerateContentRequest::from_completion(&request)).unwrap();
        assert_eq!(
            body["contents"][0]["parts"][0]["text"],
            "You convert PDF-extracted text into clean markdown.\n\npage one"
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4000);
    }

    #[test]
    fn concatenates_parts_of_first_candidate() {
        let raw = r##"{
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "# Title\n"}, {"text": "body"}]}, "finishReason": "STOP"}
            ],
            "usageMetadata": {"promptTokenCount": 5}
        }"##;
        let resp: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.text().as_deref(), Some("# Title\nbody"));
    }

    #[test]
    fn blocked_prompt_has_no_text() {
        let raw = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let resp: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.text(), None);
    }
}
