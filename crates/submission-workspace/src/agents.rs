/// Agent configuration: the `agents.yaml` document and its built-in defaults.
use std::collections::BTreeMap;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use submission_common::router::CompletionRequest;
use tracing::{info, warn};

use crate::error::AppError;

/// One configured agent. Unknown keys survive a load/save round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_tw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt_template: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Hand-edited configs often quote numbers; `4096`, `"4096"` and `4096.0`
/// all read as 4096, and a blank string as unset.
fn deserialize_lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Integer(u32),
        Float(f64),
        Text(String),
    }

    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Integer(n)) => Ok(Some(n)),
        Some(NumberOrText::Float(f)) if f.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&f) => {
            Ok(Some(f as u32))
        }
        Some(NumberOrText::Float(f)) => Err(D::Error::custom(format!(
            "max_tokens must be a whole number, got {f}"
        ))),
        Some(NumberOrText::Text(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("max_tokens must be an integer, got {text:?}")))
        }
    }
}

struct BuiltinAgent {
    id: &'static str,
    name: &'static str,
    model: &'static str,
    system_prompt: &'static str,
    max_tokens: u32,
    category: &'static str,
    description_tw: &'static str,
}

const BUILTIN_AGENTS: &[BuiltinAgent] = &[
    BuiltinAgent {
        id: "fda_510k_intel_agent",
        name: "510(k) Intelligence Agent",
        model: "gpt-4o-mini",
        system_prompt: "You are an FDA 510(k) analyst.",
        max_tokens: 12000,
        category: "FDA 510(k)",
        description_tw: "產出 510(k) 情資/摘要與表格。",
    },
    BuiltinAgent {
        id: "pdf_to_markdown_agent",
        name: "PDF → Markdown Agent",
        model: "gemini-2.5-flash",
        system_prompt: "You convert PDF-extracted text into clean markdown.",
        max_tokens: 12000,
        category: "Document",
        description_tw: "將 PDF 文字轉成乾淨 Markdown。",
    },
    BuiltinAgent {
        id: "tw_screen_review_agent",
        name: "TFDA 預審形式審查代理",
        model: "gemini-2.5-flash",
        system_prompt: "You are a TFDA premarket screen reviewer.",
        max_tokens: 12000,
        category: "TFDA Premarket",
        description_tw: "依申請書與指引做形式審查/缺漏分析。",
    },
    BuiltinAgent {
        id: "tw_app_doc_helper",
        name: "TFDA 申請書撰寫助手",
        model: "gpt-4o-mini",
        system_prompt: "You help improve TFDA application documents.",
        max_tokens: 12000,
        category: "TFDA Premarket",
        description_tw: "優化申請書 Markdown 結構與語句。",
    },
    BuiltinAgent {
        id: "note_organizer",
        name: "Note Organizer",
        model: "gpt-4o-mini",
        system_prompt: "You turn messy notes into structured markdown without adding facts.",
        max_tokens: 12000,
        category: "Note Keeper",
        description_tw: "把雜亂筆記整理成有標題/條列的 Markdown。",
    },
    BuiltinAgent {
        id: "keyword_extractor",
        name: "Keyword Extractor",
        model: "gemini-2.5-flash",
        system_prompt: "You extract high-signal keywords/entities from technical notes.",
        max_tokens: 4000,
        category: "Note Keeper",
        description_tw: "從筆記抽取高訊號關鍵字/實體。",
    },
    BuiltinAgent {
        id: "polisher",
        name: "Polisher",
        model: "gpt-4.1-mini",
        system_prompt: "You rewrite text for clarity and professional tone without changing meaning.",
        max_tokens: 12000,
        category: "Note Keeper",
        description_tw: "在不改變原意下潤稿，提升清晰度與專業性。",
    },
    BuiltinAgent {
        id: "critic",
        name: "Creative Critic",
        model: "claude-3-5-sonnet-20241022",
        system_prompt: "You give constructive, specific critique and improvement suggestions.",
        max_tokens: 12000,
        category: "Note Keeper",
        description_tw: "給出具體、可執行的建議與批判性回饋。",
    },
    BuiltinAgent {
        id: "poet_laureate",
        name: "Poet Laureate",
        model: "gemini-3-flash-preview",
        system_prompt: "You transform content into poetic or artistic prose while preserving core ideas.",
        max_tokens: 12000,
        category: "Note Keeper",
        description_tw: "把內容轉為詩/散文式表達（保留核心意思）。",
    },
    BuiltinAgent {
        id: "translator",
        name: "Translator",
        model: "gemini-2.5-flash",
        system_prompt: "You translate accurately with correct terminology.",
        max_tokens: 12000,
        category: "Note Keeper",
        description_tw: "依 UI 語言自動翻譯（中↔英）。",
    },
];

impl BuiltinAgent {
    fn to_spec(&self) -> AgentSpec {
        AgentSpec {
            name: self.name.to_string(),
            model: self.model.to_string(),
            system_prompt: self.system_prompt.to_string(),
            max_tokens: Some(self.max_tokens),
            category: Some(self.category.to_string()),
            description_tw: Some(self.description_tw.to_string()),
            ..AgentSpec::default()
        }
    }
}

/// The `agents.yaml` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentSpec>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AgentsConfig {
    /// An empty or `null` document is an empty config.
    pub fn from_yaml_str(text: &str) -> Result<Self, AppError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_value(value)?)
    }

    /// Reads `path`; a missing or unreadable file yields an empty config and a warning.
    pub fn load(path: &Path) -> (Self, Vec<String>) {
        let result = std::fs::read_to_string(path)
            .map_err(AppError::from)
            .and_then(|text| Self::from_yaml_str(&text));
        match result {
            Ok(cfg) => {
                info!(agents = cfg.agents.len(), path = %path.display(), "loaded agents config");
                (cfg, Vec::new())
            }
            Err(e) => {
                let msg = format!("agents config {} not loaded: {e}", path.display());
                warn!("{msg}");
                (Self::default(), vec![msg])
            }
        }
    }

    /// Back-fill every built-in agent the config lacks; existing entries are
    /// left untouched. Returns how many were added.
    pub fn ensure_defaults(&mut self) -> usize {
        let mut added = 0;
        for builtin in BUILTIN_AGENTS {
            if !self.agents.contains_key(builtin.id) {
                self.agents.insert(builtin.id.to_string(), builtin.to_spec());
                added += 1;
            }
        }
        added
    }

    pub fn with_defaults(mut self) -> Self {
        self.ensure_defaults();
        self
    }

    pub fn to_yaml_string(&self) -> Result<String, AppError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn get(&self, id: &str) -> Result<&AgentSpec, AppError> {
        self.agents
            .get(id)
            .ok_or_else(|| AppError::UnknownAgent(id.to_string()))
    }
}

pub const STANDARDIZATION_SYSTEM_PROMPT: &str = r#"You are a configuration Standardization Agent.
Convert the user's uploaded agent configuration (which might be in any format) into the STANDARD format used by this system.

STANDARD FORMAT (YAML):
agents:
  unique_agent_id_snake_case:
    name: "Human Readable Name"
    description: "Short description"
    category: "Category Name"
    model: "gpt-4o-mini"
    temperature: 0.2
    max_tokens: 12000
    system_prompt: |
      The system prompt text...
    user_prompt_template: |
      Optional template...

RULES:
1. Extract as many agents as possible.
2. Map fields as best as you can.
3. Ensure valid YAML output.
4. Output ONLY the YAML, no markdown code blocks."#;

/// Completion request asking `model` to rewrite an arbitrary agent config
/// into the standard `agents:` layout.
pub fn standardization_request(raw_config: &str, model: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        system_prompt: STANDARDIZATION_SYSTEM_PROMPT.to_string(),
        user_prompt: format!("Raw Content:\n{raw_config}"),
        max_tokens: 8000,
        temperature: 0.0,
    }
}

/// Parse model output, tolerating stray ```yaml fences.
pub fn parse_standardized_yaml(output: &str) -> Result<AgentsConfig, AppError> {
    let cleaned = output.replace("```yaml", "").replace("```", "");
    AgentsConfig::from_yaml_str(cleaned.trim())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_fill_but_never_overwrite() {
        let mut cfg = AgentsConfig::from_yaml_str(
            "agents:\n  translator:\n    name: My Translator\n    model: gpt-4o-mini\n    system_prompt: Translate.\n",
        )
        .unwrap();
        assert_eq!(cfg.ensure_defaults(), 9);
        assert_eq!(cfg.agents.len(), 10);
        assert_eq!(cfg.agents["translator"].name, "My Translator");
        assert_eq!(cfg.agents["keyword_extractor"].max_tokens, Some(4000));
        assert_eq!(cfg.agents["critic"].model, "claude-3-5-sonnet-20241022");
        assert_eq!(cfg.ensure_defaults(), 0);
    }

    #[test]
    fn every_builtin_is_present_after_defaults() {
        let cfg = AgentsConfig::default().with_defaults();
        for id in BUILTIN_AGENTS.iter().map(|a| a.id) {
            let spec = cfg.get(id).unwrap();
            assert!(!spec.system_prompt.is_empty(), "{id}");
        }
        assert!(matches!(cfg.get("nope"), Err(AppError::UnknownAgent(_))));
    }

    #[test]
    fn unknown_keys_round_trip() {
        let yaml = "version: 2\nagents:\n  custom:\n    name: Custom\n    model: grok-4-fast-reasoning\n    system_prompt: Be brief.\n    tags: [a, b]\n";
        let cfg = AgentsConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.extra["version"], serde_json::json!(2));
        assert_eq!(cfg.agents["custom"].extra["tags"], serde_json::json!(["a", "b"]));

        let again = AgentsConfig::from_yaml_str(&cfg.to_yaml_string().unwrap()).unwrap();
        assert_eq!(again, cfg);
    }

    #[test]
    fn empty_documents_are_empty_configs() {
        assert!(AgentsConfig::from_yaml_str("").unwrap().agents.is_empty());
        assert!(AgentsConfig::from_yaml_str("~").unwrap().agents.is_empty());
        assert!(AgentsConfig::from_yaml_str("other: 1").unwrap().agents.is_empty());
        assert!(AgentsConfig::from_yaml_str("agents: [1, 2]").is_err());
    }

    #[test]
    fn load_degrades_on_missing_or_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, warnings) = AgentsConfig::load(&dir.path().join("agents.yaml"));
        assert!(cfg.agents.is_empty());
        assert_eq!(warnings.len(), 1);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"agents: {unclosed").unwrap();
        let (cfg, warnings) = AgentsConfig::load(file.path());
        assert!(cfg.agents.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn standardized_output_with_fences() {
        let output = "```yaml\nagents:\n  summarizer:\n    name: Summarizer\n    model: gemini-2.5-flash\n    temperature: 0.2\n    system_prompt: |\n      Summarize.\n```";
        let cfg = parse_standardized_yaml(output).unwrap();
        let spec = &cfg.agents["summarizer"];
        assert_eq!(spec.temperature, Some(0.2));
        assert_eq!(spec.system_prompt.trim_end(), "Summarize.");
    }

    #[test]
    fn standardization_request_shape() {
        let req = standardization_request("name: x", "gpt-4o-mini");
        assert_eq!(req.user_prompt, "Raw Content:\nname: x");
        assert_eq!(req.max_tokens, 8000);
        assert!(req.system_prompt.contains("Output ONLY the YAML"));
    }

    #[test]
    fn quoted_max_tokens_still_load() {
        let cfg = AgentsConfig::from_yaml_str(
            "agents:\n  a:\n    max_tokens: \"4096\"\n  b:\n    max_tokens: 2000\n  c:\n    max_tokens: ''\n  d:\n    name: D\n",
        )
        .unwrap();
        assert_eq!(cfg.agents["a"].max_tokens, Some(4096));
        assert_eq!(cfg.agents["b"].max_tokens, Some(2000));
        assert_eq!(cfg.agents["c"].max_tokens, None);
        assert_eq!(cfg.agents["d"].max_tokens, None);

        assert!(AgentsConfig::from_yaml_str("agents:\n  a:\n    max_tokens: lots\n").is_err());
    }
}
