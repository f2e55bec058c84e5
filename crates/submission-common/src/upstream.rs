use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::error::LlmError;

/// Decode a successful JSON body, or turn a non-2xx response into an upstream error.
pub(crate) async fn parse_json_response<T: DeserializeOwned>(
    resp: reqwest::Response,
    max_error_body_bytes: usize,
) -> Result<T, LlmError> {
    if resp.status().is_success() {
        let bytes = resp.bytes().await?;
        return Ok(serde_json::from_slice::<T>(&bytes)?);
    }
    Err(to_upstream_error(resp, max_error_body_bytes).await)
}

async fn to_upstream_error(resp: reqwest::Response, max_error_body_bytes: usize) -> LlmError {
    let status = resp.status();
    let body = read_limited_text(resp, max_error_body_bytes).await;
    upstream_error(status, body)
}

/// OpenAI, Anthropic and Gemini all report failures as `{"error": {"message": ...}}`.
pub(crate) fn upstream_error(status: StatusCode, body: String) -> LlmError {
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let message = parsed
            .error
            .message
            .unwrap_or_else(|| "unknown upstream error".to_string());
        return LlmError::Upstream { status, message };
    }
    LlmError::UpstreamBody { status, body }
}

async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(mut b) => {
            if b.len() > max_bytes {
                b.truncate(max_bytes);
            }
            String::from_utf8_lossy(&b).to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to read upstream error body");
            "<failed to read error body>".to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorObject,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_error_body_yields_message() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = upstream_error(StatusCode::SERVICE_UNAVAILABLE, body.to_string());
        assert!(matches!(
            err,
            LlmError::Upstream { status, ref message }
                if status == StatusCode::SERVICE_UNAVAILABLE && message == "Overloaded"
        ));
    }

    #[test]
    fn plain_error_body_is_kept_verbatim() {
        let err = upstream_error(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>".to_string());
        assert!(matches!(err, LlmError::UpstreamBody { ref body, .. } if body.contains("bad gateway")));
    }
}
