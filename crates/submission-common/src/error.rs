/// Error types for the LLM routing layer.
///
/// Every variant is recoverable from the caller's point of view: the workspace
/// surfaces the message to the user and the user decides whether to retry.
/// Application errors in the server crate wrap `LlmError` via `#[from]`.
use reqwest::StatusCode;

use crate::provider::Provider;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("unknown/unsupported model: {0}")]
    UnknownModel(String),

    #[error("missing API key for provider: {provider} (set {env_var} or provide a session key)")]
    MissingCredential {
        provider: Provider,
        env_var: &'static str,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("upstream returned error: status={status} message={message}")]
    Upstream { status: StatusCode, message: String },

    #[error("upstream returned non-JSON error: status={status} body={body}")]
    UpstreamBody { status: StatusCode, body: String },

    #[error("{provider} response did not contain any completion text")]
    EmptyCompletion { provider: Provider },
}
