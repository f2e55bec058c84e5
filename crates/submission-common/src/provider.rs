/// Provider classification and credential resolution.
///
/// Every selectable model belongs to exactly one of four providers. The table
/// is static; routing a model that is not listed is an error rather than a
/// guess based on the model name.
use std::collections::HashMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Gemini,
    Anthropic,
    Grok,
}

/// Models offered for selection, grouped by provider in display order.
pub const MODEL_CATALOG: &[(Provider, &[&str])] = &[
    (Provider::OpenAi, &["gpt-4o-mini", "gpt-4.1-mini"]),
    (
        Provider::Gemini,
        &[
            "gemini-2.5-flash",
            "gemini-3-flash-preview",
            "gemini-2.5-flash-lite",
            "gemini-3-pro-preview",
        ],
    ),
    (
        Provider::Anthropic,
        &[
            "claude-3-5-sonnet-20241022",
            "claude-3-5-haiku-20241022",
            "claude-3-opus-20240229",
        ],
    ),
    (
        Provider::Grok,
        &["grok-4-fast-reasoning", "grok-4-1-fast-non-reasoning"],
    ),
];

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenAi,
        Provider::Gemini,
        Provider::Anthropic,
        Provider::Grok,
    ];

    /// Classify a model ID. Fails for models outside the catalog.
    pub fn for_model(model: &str) -> Result<Self, LlmError> {
        MODEL_CATALOG
            .iter()
            .find(|(_, models)| models.contains(&model))
            .map(|(provider, _)| *provider)
            .ok_or_else(|| LlmError::UnknownModel(model.to_string()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Anthropic => "anthropic",
            Provider::Grok => "grok",
        }
    }

    /// Environment variable consulted when no session key is set.
    pub fn env_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Grok => "GROK_API_KEY",
        }
    }

    pub fn models(self) -> &'static [&'static str] {
        MODEL_CATALOG
            .iter()
            .find(|(provider, _)| *provider == self)
            .map(|(_, models)| *models)
            .unwrap_or(&[])
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All selectable model IDs in catalog order.
pub fn all_models() -> Vec<&'static str> {
    MODEL_CATALOG
        .iter()
        .flat_map(|(_, models)| models.iter().copied())
        .collect()
}

/// Where a provider's key currently comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Env,
    Session,
    Missing,
}

/// Per-session API keys. Keys live only as long as the session does.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    session: HashMap<Provider, String>,
}

impl Credentials {
    /// Store a session key. A blank key clears the entry.
    pub fn set(&mut self, provider: Provider, key: &str) {
        let key = key.trim();
        if key.is_empty() {
            self.session.remove(&provider);
        } else {
            self.session.insert(provider, key.to_string());
        }
    }

    pub fn clear(&mut self, provider: Provider) {
        self.session.remove(&provider);
    }

    /// Session key first, then the provider's environment variable.
    pub fn resolve(&self, provider: Provider) -> Option<String> {
        self.resolve_with(provider, |var| std::env::var(var).ok())
    }

    pub fn resolve_with<F>(&self, provider: Provider, env: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = self.session.get(&provider) {
            return Some(key.clone());
        }
        env(provider.env_var())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Resolve or fail with a missing-credential error.
    pub fn require(&self, provider: Provider) -> Result<String, LlmError> {
        self.resolve(provider).ok_or(LlmError::MissingCredential {
            provider,
            env_var: provider.env_var(),
        })
    }

    pub fn status(&self, provider: Provider) -> KeyStatus {
        self.status_with(provider, |var| std::env::var(var).ok())
    }

    /// The environment wins the status report even when a session key is also set.
    pub fn status_with<F>(&self, provider: Provider, env: F) -> KeyStatus
    where
        F: Fn(&str) -> Option<String>,
    {
        if env(provider.env_var()).is_some_and(|v| !v.trim().is_empty()) {
            return KeyStatus::Env;
        }
        if self.session.contains_key(&provider) {
            return KeyStatus::Session;
        }
        KeyStatus::Missing
    }
}
