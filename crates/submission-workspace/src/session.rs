/// Explicit per-session application state.
///
/// Everything the workspace remembers between tool calls lives in
/// `SessionState`. It is built once by `initialize` and handed to handlers by
/// reference; there is no other mutable state.
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use submission_common::history::SessionHistory;
use submission_common::provider::Credentials;
use submission_common::router::CompletionRequest;
use tracing::info;

use crate::agents::AgentsConfig;
use crate::checklist::checklist_to_markdown;
use crate::config::{Config, Language};
use crate::defaults::{load_datasets, load_guidance, GuidanceLibrary};
use crate::error::AppError;
use crate::mapping::{standardize_batch, AliasTable, BatchOutcome, MappingPolicy};
use crate::model::{ApplicationRecord, ChecklistItem, ChecklistSet, DefaultDatasets, GuidanceDomain, TwCaseSet};
use crate::reports::{render_application_markdown, CompanyTemplate};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Settings {
    pub language: Language,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Soft per-session token budget shown next to usage stats.
    pub token_budget_est: u64,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            language: config.language,
            model: config.default_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            token_budget_est: 250_000,
        }
    }
}

/// Agent prompt followed by the material it works on.
pub fn compose_user_prompt(prompt: &str, input: &str) -> String {
    format!("{}\n\n---\n\n{}", prompt.trim(), input).trim().to_string()
}

pub const TW_SCREEN_AGENT: &str = "tw_screen_review_agent";

const TW_SCREEN_PROMPT_ZH: &str = "你是一位熟悉臺灣「第二、三等級醫療器材查驗登記」的形式審查(預審)審查員。

請根據：
1) 申請書草稿（Markdown）
2) 預審/形式審查指引（如有）

以繁體中文 Markdown 輸出：
- 形式完整性檢核表（含：文件項目｜預期應附？｜是否提及？｜是否檢附？｜判定｜備註/補件）
- 重要欄位檢核（問題項目/疑慮/建議補充）
- 預審評語摘要（300–600字）
- 無從判斷請明確註記
";

const TW_SCREEN_PROMPT_EN: &str = "You are a formal (pre-)screening reviewer for Taiwan class II/III medical device registration applications.

Based on:
1) the application draft (Markdown)
2) the screening guidance (if any)

Write English Markdown with:
- A formal completeness table (document item | expected? | mentioned? | attached? | verdict | notes/requests)
- Key field checks (issue / concern / suggested supplement)
- A screening summary (150-300 words)
- Explicit notes wherever something cannot be determined
";

pub const K510_STRUCTURE_PROMPT: &str = "You are a 510(k) submission organizer.

Restructure the following content into organized markdown with sections such as:
- Device & submitter information
- Device description and technology
- Indications for use
- Predicate/comparator information
- Performance testing
- Risks and risk controls

Do not invent facts; reorganize and clarify only.
";

pub const K510_REVIEW_PROMPT: &str = "You are drafting an internal FDA 510(k) review memo.

Using the checklist and structured submission, write a concise review report with:
- Introduction & scope
- Device and submission overview
- Key differences vs predicate(s)
- Checklist-based assessment (headings/tables)
- Conclusion and recommendations

Keep it grounded in evidence. If evidence is missing, say so explicitly.
";

/// The two-step 510(k) review: a structured submission, then a memo built
/// from it, the checklist and the effective 510(k) guidance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct K510Review {
    pub structured_submission: String,
    pub report: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowStep {
    pub agent_id: String,
    pub name: String,
    pub model: String,
    pub max_tokens: u32,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "state", content = "message")]
pub enum StepStatus {
    Idle,
    Done,
    Error(String),
}

/// A chain of agent runs where each step reads the previous step's output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Workflow {
    pub steps: Vec<WorkflowStep>,
    /// Index of the next step to run.
    pub cursor: usize,
    /// Input to the first step.
    pub input: String,
    pub outputs: Vec<String>,
    pub statuses: Vec<StepStatus>,
    /// Bumped on every reset; a step run only lands in the generation it started in.
    #[serde(default)]
    pub generation: u64,
}

/// A workflow step taken out of the session to run without holding the lock.
#[derive(Debug, Clone)]
pub struct StepRun {
    pub index: usize,
    pub generation: u64,
    pub name: String,
    pub request: CompletionRequest,
}

impl Workflow {
    pub fn new(steps: Vec<WorkflowStep>) -> Self {
        let n = steps.len();
        Self {
            steps,
            cursor: 0,
            input: String::new(),
            outputs: vec![String::new(); n],
            statuses: vec![StepStatus::Idle; n],
            generation: 0,
        }
    }

    pub fn default_steps(settings: &Settings) -> Vec<WorkflowStep> {
        let step = |agent_id: &str, name: &str, prompt: &str| WorkflowStep {
            agent_id: agent_id.to_string(),
            name: name.to_string(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            prompt: prompt.to_string(),
        };
        vec![
            step(
                "pdf_to_markdown_agent",
                "PDF → Markdown Agent",
                "Convert the following content into clean structured Markdown. Preserve headings/lists/tables. Do not add facts.",
            ),
            step(
                "fda_510k_intel_agent",
                "510(k) Intelligence Agent",
                "Analyze the provided context and produce a reviewer-oriented report with tables and risks. Keep it grounded in input.",
            ),
        ]
    }

    /// Start over with new input, keeping the steps.
    pub fn reset(&mut self, input: impl Into<String>) {
        let steps = std::mem::take(&mut self.steps);
        self.restart(steps, input);
    }

    /// Start over with new steps and input.
    pub fn restart(&mut self, steps: Vec<WorkflowStep>, input: impl Into<String>) {
        let generation = self.generation + 1;
        *self = Self::new(steps);
        self.generation = generation;
        self.input = input.into();
    }

    /// Input the step at `index` would run on.
    pub fn input_for(&self, index: usize) -> &str {
        if index == 0 {
            &self.input
        } else {
            self.outputs.get(index - 1).map(String::as_str).unwrap_or("")
        }
    }

    /// The step under the cursor and its input.
    pub fn next_step(&self) -> Result<(usize, &WorkflowStep, &str), AppError> {
        let step = self.steps.get(self.cursor).ok_or(AppError::WorkflowExhausted)?;
        Ok((self.cursor, step, self.input_for(self.cursor)))
    }

    fn check_generation(&self, generation: u64, index: usize) -> Result<(), AppError> {
        if generation != self.generation || index >= self.steps.len() {
            return Err(AppError::WorkflowChanged(index));
        }
        Ok(())
    }

    pub fn record_output(&mut self, generation: u64, index: usize, output: String) -> Result<(), AppError> {
        self.check_generation(generation, index)?;
        self.outputs[index] = output;
        self.statuses[index] = StepStatus::Done;
        self.cursor = self.cursor.max(index + 1);
        Ok(())
    }

    pub fn record_error(&mut self, generation: u64, index: usize, message: String) -> Result<(), AppError> {
        self.check_generation(generation, index)?;
        self.statuses[index] = StepStatus::Error(message);
        Ok(())
    }

    /// Replace a step's output; the next step will read the edited text.
    pub fn edit_output(&mut self, index: usize, output: String) -> Result<(), AppError> {
        let slot = self.outputs.get_mut(index).ok_or(AppError::UnknownStep(index))?;
        *slot = output;
        Ok(())
    }

    pub fn final_output(&self) -> &str {
        self.outputs.last().map(String::as_str).unwrap_or("")
    }
}

pub struct SessionState {
    pub settings: Settings,
    pub credentials: Credentials,
    pub history: SessionHistory,
    pub aliases: AliasTable,
    pub mapping_policy: MappingPolicy,
    pub datasets: DefaultDatasets,
    pub guidance: GuidanceLibrary,
    pub agents: AgentsConfig,
    /// Standardized cases of the loaded TW dataset.
    pub cases: Vec<ApplicationRecord>,
    pub active_case: usize,
    /// The application currently under review.
    pub application: ApplicationRecord,
    tw_guidance: String,
    k510_guidance: String,
    /// The 510(k) checklist currently in use.
    pub checklist: Vec<ChecklistItem>,
    pub company_templates: Vec<CompanyTemplate>,
    pub workflow: Workflow,
    pub k510: K510Review,
    /// Loader degradations, shown to the user.
    pub warnings: Vec<String>,
    dataset_path: PathBuf,
    guidance_path: PathBuf,
}

impl SessionState {
    pub fn initialize(config: &Config) -> Self {
        let settings = Settings::from_config(config);
        let (agents, agent_warnings) = AgentsConfig::load(&config.agents_path);
        let workflow = Workflow::new(Workflow::default_steps(&settings));

        let mut state = Self {
            settings,
            credentials: Credentials::default(),
            history: SessionHistory::default(),
            aliases: AliasTable::with_defaults(),
            mapping_policy: config.mapping_policy.clone(),
            datasets: DefaultDatasets::default(),
            guidance: GuidanceLibrary::default(),
            agents: agents.with_defaults(),
            cases: Vec::new(),
            active_case: 0,
            application: ApplicationRecord::empty(),
            tw_guidance: String::new(),
            k510_guidance: String::new(),
            checklist: Vec::new(),
            company_templates: Vec::new(),
            workflow,
            k510: K510Review::default(),
            warnings: agent_warnings,
            dataset_path: config.dataset_path.clone(),
            guidance_path: config.guidance_path.clone(),
        };
        let warnings = state.reload_defaults();
        state.warnings.extend(warnings);
        info!(
            agents = state.agents.agents.len(),
            guidance = state.guidance.len(),
            warnings = state.warnings.len(),
            "session initialized"
        );
        state
    }

    /// Re-read the default dataset and guidance files, replacing what was loaded.
    pub fn reload_defaults(&mut self) -> Vec<String> {
        let (datasets, mut warnings) = load_datasets(&self.dataset_path);
        let (guidance, guidance_warnings) = load_guidance(&self.guidance_path);
        warnings.extend(guidance_warnings);
        self.datasets = datasets;
        self.guidance = guidance;
        warnings
    }

    pub fn effective_guidance(&self, domain: GuidanceDomain) -> &str {
        match domain {
            GuidanceDomain::Tw => &self.tw_guidance,
            GuidanceDomain::K510 => &self.k510_guidance,
        }
    }

    pub fn set_effective_guidance(&mut self, domain: GuidanceDomain, markdown: String) {
        match domain {
            GuidanceDomain::Tw => self.tw_guidance = markdown,
            GuidanceDomain::K510 => self.k510_guidance = markdown,
        }
    }

    pub fn tw_dataset(&self, id: &str) -> Result<&TwCaseSet, AppError> {
        self.datasets
            .tw_cases
            .get(id)
            .ok_or_else(|| AppError::UnknownDataset(id.to_string()))
    }

    pub fn checklist_set(&self, id: &str) -> Result<&ChecklistSet, AppError> {
        self.datasets
            .k510_checklists
            .get(id)
            .ok_or_else(|| AppError::UnknownDataset(id.to_string()))
    }

    /// Standardize a default TW dataset into the case list; the first case
    /// becomes the application under review.
    pub fn load_tw_dataset(&mut self, id: &str) -> Result<BatchOutcome, AppError> {
        let set = self.tw_dataset(id)?;
        let outcome = standardize_batch(&set.cases, &self.aliases, &self.mapping_policy);
        self.replace_cases(outcome.records.clone());
        Ok(outcome)
    }

    pub fn replace_cases(&mut self, cases: Vec<ApplicationRecord>) {
        self.cases = cases;
        self.active_case = 0;
        if let Some(first) = self.cases.first() {
            self.application = first.clone();
        }
    }

    /// Request for one agent run; the agent's model and token limit apply
    /// unless overridden.
    pub fn agent_request(
        &self,
        agent_id: &str,
        prompt: &str,
        input: &str,
        model: Option<&str>,
        max_tokens: Option<u32>,
    ) -> Result<CompletionRequest, AppError> {
        let agent = self.agents.get(agent_id)?;
        if prompt.trim().is_empty() && input.trim().is_empty() {
            return Err(AppError::MissingInput("prompt and input are both empty".to_string()));
        }
        let model = model
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .or_else(|| Some(agent.model.clone()).filter(|m| !m.is_empty()))
            .unwrap_or_else(|| self.settings.model.clone());
        Ok(CompletionRequest {
            model,
            system_prompt: agent.system_prompt.clone(),
            user_prompt: compose_user_prompt(prompt, input),
            max_tokens: max_tokens.or(agent.max_tokens).unwrap_or(self.settings.max_tokens),
            temperature: self.settings.temperature,
        })
    }

    /// Screening input: the application draft followed by the effective TW
    /// guidance, or a note that none was provided.
    pub fn tw_screen_input(&self) -> String {
        let language = self.settings.language;
        let application = render_application_markdown(&self.application, language);
        let guidance = match self.effective_guidance(GuidanceDomain::Tw).trim() {
            "" => language.pick(
                "（尚未提供指引，請依一般法規常規進行形式檢核）",
                "(No screening guidance provided; apply general regulatory practice for the formal check.)",
            ),
            _ => self.effective_guidance(GuidanceDomain::Tw),
        };
        format!(
            "=== {} ===\n{application}\n\n=== {} ===\n{guidance}\n",
            language.pick("申請書草稿（Markdown）", "Application draft (Markdown)"),
            language.pick("預審 / 形式審查指引（Markdown）", "Screening guidance (Markdown)"),
        )
    }

    /// Screen review of the application under review by the TW screening agent.
    pub fn tw_screen_request(
        &self,
        prompt: Option<&str>,
        model: Option<&str>,
        max_tokens: Option<u32>,
    ) -> Result<CompletionRequest, AppError> {
        let prompt = prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.settings.language.pick(TW_SCREEN_PROMPT_ZH, TW_SCREEN_PROMPT_EN));
        self.agent_request(TW_SCREEN_AGENT, prompt, &self.tw_screen_input(), model, max_tokens)
    }

    /// First 510(k) step: reorganize raw submission material.
    pub fn k510_structure_request(&self, submission: &str) -> Result<CompletionRequest, AppError> {
        if submission.trim().is_empty() {
            return Err(AppError::MissingInput("510(k) submission material is empty".to_string()));
        }
        Ok(CompletionRequest {
            model: self.settings.model.clone(),
            system_prompt: "You structure a 510(k) submission.".to_string(),
            user_prompt: format!("{K510_STRUCTURE_PROMPT}\n\n=== SUBMISSION ===\n{submission}"),
            max_tokens: self.settings.max_tokens,
            temperature: 0.15,
        })
    }

    /// Second 510(k) step. The stored structured submission and the session
    /// checklist are used unless overridden; both must end up non-blank.
    pub fn k510_review_request(
        &self,
        structured_submission: Option<&str>,
        checklist_markdown: Option<&str>,
    ) -> Result<CompletionRequest, AppError> {
        let submission = structured_submission
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.k510.structured_submission);
        let session_checklist = checklist_to_markdown(&self.checklist);
        let checklist = checklist_markdown
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&session_checklist);
        if submission.trim().is_empty() || checklist.trim().is_empty() {
            return Err(AppError::MissingInput(
                "need both a structured submission and a checklist".to_string(),
            ));
        }

        let guidance = self.effective_guidance(GuidanceDomain::K510);
        Ok(CompletionRequest {
            model: self.settings.model.clone(),
            system_prompt: "You are an FDA 510(k) reviewer.".to_string(),
            user_prompt: format!(
                "{K510_REVIEW_PROMPT}\n\n=== PIPELINE GUIDANCE (optional) ===\n{guidance}\n\n=== CHECKLIST ===\n{checklist}\n\n=== STRUCTURED SUBMISSION ===\n{submission}"
            ),
            max_tokens: self.settings.max_tokens,
            temperature: 0.18,
        })
    }

    /// The step under the workflow cursor, ready to run.
    pub fn workflow_request(&self) -> Result<StepRun, AppError> {
        let (index, step, input) = self.workflow.next_step()?;
        let system_prompt = self
            .agents
            .agents
            .get(&step.agent_id)
            .map(|a| a.system_prompt.clone())
            .unwrap_or_default();
        let request = CompletionRequest {
            model: step.model.clone(),
            system_prompt,
            user_prompt: compose_user_prompt(&step.prompt, input),
            max_tokens: step.max_tokens,
            temperature: self.settings.temperature,
        };
        Ok(StepRun {
            index,
            generation: self.workflow.generation,
            name: step.name.clone(),
            request,
        })
    }
}
