use std::path::PathBuf;

use submission_common::provider::Provider;

use crate::error::AppError;
use crate::mapping::MappingPolicy;

/// UI language of generated prompts and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub enum Language {
    #[serde(rename = "zh-tw")]
    ZhTw,
    #[serde(rename = "en")]
    En,
}

impl Language {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "zh-tw" | "zh_tw" | "zh" => Some(Language::ZhTw),
            "en" => Some(Language::En),
            _ => None,
        }
    }

    /// The variant of a user-facing string for this language.
    pub fn pick<'a>(self, zh_tw: &'a str, en: &'a str) -> &'a str {
        match self {
            Language::ZhTw => zh_tw,
            Language::En => en,
        }
    }
}

pub const MAX_TOKENS_LIMIT: u32 = 120_000;

/// Shared bound for the configured and the session `max_tokens`.
pub fn check_max_tokens(value: u32) -> Result<u32, String> {
    if (1..=MAX_TOKENS_LIMIT).contains(&value) {
        Ok(value)
    } else {
        Err(format!("max_tokens must be within 1..={MAX_TOKENS_LIMIT}, got {value}"))
    }
}

pub fn check_temperature(value: f32) -> Result<f32, String> {
    if (0.0..=2.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("temperature must be within 0.0..=2.0, got {value}"))
    }
}

/// Application configuration loaded explicitly from environment variables.
///
/// Every value has a default; only malformed values are rejected.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default dataset bundle (`tw_cases`, `k510_checklists`).
    pub dataset_path: PathBuf,
    /// Guidance bundle with `BEGIN_SECTION` blocks.
    pub guidance_path: PathBuf,
    pub agents_path: PathBuf,
    pub default_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub language: Language,
    pub mapping_policy: MappingPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional:
    /// - `WORKSPACE_DATASET_PATH` (default `defaultdataset.json`)
    /// - `WORKSPACE_GUIDANCE_PATH` (default `defaultguide.md`)
    /// - `WORKSPACE_AGENTS_PATH` (default `agents.yaml`)
    /// - `WORKSPACE_DEFAULT_MODEL` (default `gpt-4o-mini`)
    /// - `WORKSPACE_MAX_TOKENS` (default 12000)
    /// - `WORKSPACE_TEMPERATURE` (default 0.2)
    /// - `WORKSPACE_LANGUAGE` (`zh-tw` or `en`)
    /// - `MAPPING_FAILURE_MIN_POPULATED` / `MAPPING_FAILURE_MIN_MISSING`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        fn parsed<T: std::str::FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T, AppError> {
            match raw {
                Some(v) => v
                    .parse()
                    .map_err(|_| AppError::Config(format!("{name} has an invalid value: {v}"))),
                None => Ok(default),
            }
        }

        let default_model = var("WORKSPACE_DEFAULT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        Provider::for_model(&default_model)
            .map_err(|_| AppError::Config(format!("WORKSPACE_DEFAULT_MODEL is not a known model: {default_model}")))?;

        let language = match var("WORKSPACE_LANGUAGE") {
            Some(v) => Language::parse(&v)
                .ok_or_else(|| AppError::Config(format!("WORKSPACE_LANGUAGE must be zh-tw or en, got {v}")))?,
            None => Language::ZhTw,
        };

        let temperature = check_temperature(parsed(
            "WORKSPACE_TEMPERATURE",
            var("WORKSPACE_TEMPERATURE"),
            0.2,
        )?)
        .map_err(|e| AppError::Config(format!("WORKSPACE_TEMPERATURE: {e}")))?;
        let max_tokens = check_max_tokens(parsed(
            "WORKSPACE_MAX_TOKENS",
            var("WORKSPACE_MAX_TOKENS"),
            12000,
        )?)
        .map_err(|e| AppError::Config(format!("WORKSPACE_MAX_TOKENS: {e}")))?;

        let defaults = MappingPolicy::default();
        let mapping_policy = MappingPolicy {
            failure_min_populated: parsed(
                "MAPPING_FAILURE_MIN_POPULATED",
                var("MAPPING_FAILURE_MIN_POPULATED"),
                defaults.failure_min_populated,
            )?,
            failure_min_missing: parsed(
                "MAPPING_FAILURE_MIN_MISSING",
                var("MAPPING_FAILURE_MIN_MISSING"),
                defaults.failure_min_missing,
            )?,
            ..defaults
        };

        Ok(Self {
            dataset_path: var("WORKSPACE_DATASET_PATH")
                .unwrap_or_else(|| "defaultdataset.json".to_string())
                .into(),
            guidance_path: var("WORKSPACE_GUIDANCE_PATH")
                .unwrap_or_else(|| "defaultguide.md".to_string())
                .into(),
            agents_path: var("WORKSPACE_AGENTS_PATH")
                .unwrap_or_else(|| "agents.yaml".to_string())
                .into(),
            default_model,
            max_tokens,
            temperature,
            language,
            mapping_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_with(vars: &[(&str, &str)]) -> Result<Config, AppError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.dataset_path, PathBuf::from("defaultdataset.json"));
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.max_tokens, 12000);
        assert_eq!(config.language, Language::ZhTw);
        assert_eq!(config.mapping_policy, MappingPolicy::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_with(&[
            ("WORKSPACE_DEFAULT_MODEL", "claude-3-5-haiku-20241022"),
            ("WORKSPACE_MAX_TOKENS", "4000"),
            ("WORKSPACE_LANGUAGE", "EN"),
            ("MAPPING_FAILURE_MIN_MISSING", " 10 "),
            ("WORKSPACE_AGENTS_PATH", "/etc/workspace/agents.yaml"),
        ])
        .unwrap();
        assert_eq!(config.max_tokens, 4000);
        assert_eq!(config.language, Language::En);
        assert_eq!(config.mapping_policy.failure_min_missing, 10);
        assert_eq!(config.mapping_policy.failure_min_populated, 3);
        assert_eq!(config.agents_path, PathBuf::from("/etc/workspace/agents.yaml"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        for vars in [
            [("WORKSPACE_MAX_TOKENS", "lots")],
            [("WORKSPACE_DEFAULT_MODEL", "gpt-2")],
            [("WORKSPACE_TEMPERATURE", "7")],
            [("WORKSPACE_MAX_TOKENS", "0")],
            [("WORKSPACE_MAX_TOKENS", "500000")],
            [("WORKSPACE_LANGUAGE", "fr")],
            [("MAPPING_FAILURE_MIN_POPULATED", "-1")],
        ] {
            assert!(matches!(config_with(&vars), Err(AppError::Config(_))), "{vars:?}");
        }
    }

    #[test]
    fn setting_bounds_are_shared() {
        assert_eq!(check_max_tokens(1).unwrap(), 1);
        assert_eq!(check_max_tokens(MAX_TOKENS_LIMIT).unwrap(), MAX_TOKENS_LIMIT);
        assert!(check_max_tokens(0).is_err());
        assert!(check_temperature(2.0).is_ok());
        assert!(check_temperature(-0.1).is_err());
    }

    #[test]
    fn language_picks_its_variant() {
        assert_eq!(Language::ZhTw.pick("是", "yes"), "是");
        assert_eq!(Language::En.pick("是", "yes"), "yes");
    }
}
