use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::provider::{KeyStatus, Provider};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SetApiKeyParams {
    /// Provider name: "openai", "gemini", "anthropic" or "grok".
    pub provider: String,
    /// API key kept for this session only. An empty string clears the session key.
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProviderModels {
    pub provider: Provider,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelCatalogResponse {
    pub default_model: String,
    pub providers: Vec<ProviderModels>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProviderKeyStatus {
    pub provider: Provider,
    pub env_var: String,
    pub status: KeyStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProviderStatusResponse {
    pub providers: Vec<ProviderKeyStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TextResponse {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OkResponse {
    pub ok: bool,
}
