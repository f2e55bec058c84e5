/// Single entry point for LLM completions across all providers.
///
/// The router classifies the requested model, resolves a credential for its
/// provider and dispatches one request through that provider's wire protocol.
/// There are no retries and no streaming: one call per invocation, and any
/// failure is returned to the caller as-is.
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::anthropic::AnthropicClient;
use crate::error::LlmError;
use crate::gemini::GeminiClient;
use crate::openai::ChatCompletionsClient;
use crate::provider::{Credentials, Provider};

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub openai_base_url: String,
    pub gemini_base_url: String,
    pub anthropic_base_url: String,
    pub grok_base_url: String,
    pub default_timeout: Duration,
    pub grok_timeout: Duration,
    pub max_error_body_bytes: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            anthropic_base_url: "https://api.anthropic.com/v1".to_string(),
            grok_base_url: "https://api.x.ai/v1".to_string(),
            default_timeout: Duration::from_secs(120),
            grok_timeout: Duration::from_secs(90),
            max_error_body_bytes: 8 * 1024,
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url = |var: &str, fallback: String| {
            std::env::var(var)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(fallback)
                .trim_end_matches('/')
                .to_string()
        };

        let secs = |var: &str, fallback: Duration| {
            std::env::var(var)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        let max_error_body_bytes = std::env::var("LLM_MAX_ERROR_BODY_BYTES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_error_body_bytes);

        Self {
            openai_base_url: base_url("OPENAI_BASE_URL", defaults.openai_base_url),
            gemini_base_url: base_url("GEMINI_BASE_URL", defaults.gemini_base_url),
            anthropic_base_url: base_url("ANTHROPIC_BASE_URL", defaults.anthropic_base_url),
            grok_base_url: base_url("GROK_BASE_URL", defaults.grok_base_url),
            default_timeout: secs("LLM_TIMEOUT_SECS", defaults.default_timeout),
            grok_timeout: secs("GROK_TIMEOUT_SECS", defaults.grok_timeout),
            max_error_body_bytes,
        }
    }
}

/// Provider-neutral request shape.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Completion {
    pub provider: Provider,
    pub model: String,
    pub text: String,
}

/// One variant per provider, each speaking its own wire protocol.
pub enum ProviderClient {
    OpenAi(ChatCompletionsClient),
    Gemini(GeminiClient),
    Anthropic(AnthropicClient),
    Grok(ChatCompletionsClient),
}

impl ProviderClient {
    pub fn provider(&self) -> Provider {
        match self {
            ProviderClient::OpenAi(_) => Provider::OpenAi,
            ProviderClient::Gemini(_) => Provider::Gemini,
            ProviderClient::Anthropic(_) => Provider::Anthropic,
            ProviderClient::Grok(_) => Provider::Grok,
        }
    }

    pub async fn complete(
        &self,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<String, LlmError> {
        match self {
            ProviderClient::OpenAi(c) | ProviderClient::Grok(c) => c.complete(api_key, request).await,
            ProviderClient::Gemini(c) => c.complete(api_key, request).await,
            ProviderClient::Anthropic(c) => c.complete(api_key, request).await,
        }
    }
}

#[derive(Clone)]
pub struct LlmRouter {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl LlmRouter {
    pub fn new(config: ProviderConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .user_agent("submission-workspace/llm-router")
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn client_for(&self, provider: Provider) -> ProviderClient {
        let http = self.http.clone();
        let max_err = self.config.max_error_body_bytes;
        match provider {
            Provider::OpenAi => ProviderClient::OpenAi(ChatCompletionsClient::new(
                Provider::OpenAi,
                http,
                &self.config.openai_base_url,
                self.config.default_timeout,
                max_err,
            )),
            Provider::Grok => ProviderClient::Grok(ChatCompletionsClient::new(
                Provider::Grok,
                http,
                &self.config.grok_base_url,
                self.config.grok_timeout,
                max_err,
            )),
            Provider::Gemini => ProviderClient::Gemini(GeminiClient::new(
                http,
                &self.config.gemini_base_url,
                self.config.default_timeout,
                max_err,
            )),
            Provider::Anthropic => ProviderClient::Anthropic(AnthropicClient::new(
                http,
                &self.config.anthropic_base_url,
                self.config.default_timeout,
                max_err,
            )),
        }
    }

    /// Route one completion. Fails before any network traffic when the model
    /// is unknown or no key can be resolved.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> Result<Completion, LlmError> {
        let provider = Provider::for_model(&request.model)?;
        let api_key = credentials.require(provider)?;

        debug!(
            provider = %provider,
            model = %request.model,
            max_tokens = request.max_tokens,
            "dispatching completion"
        );
        let text = self.client_for(provider).complete(&api_key, request).await?;
        info!(provider = %provider, model = %request.model, chars = text.len(), "completion received");

        Ok(Completion {
            provider,
            model: request.model.clone(),
            text,
        })
    }
}
