use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use submission_common::history::{HistoryEvent, UsageStats};
use submission_common::provider::Provider;

use crate::config::Language;
use crate::export::{ExportFormat, ExportTarget};
use crate::mapping::BatchFailure;
use crate::model::{ChecklistItem, GuidanceDocument, GuidanceDomain, StructuredGuidance};
use crate::reports::{CompanyTemplate, MissingItemsReport};
use crate::session::{Settings, StepStatus, Workflow, WorkflowStep};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateSettingsParams {
    pub language: Option<Language>,
    /// Default model for agent runs; must be one of `list_models`.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SettingsResponse {
    pub settings: Settings,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StandardizeRecordParams {
    /// Raw record with arbitrary keys (localized labels, camelCase exports or canonical names).
    pub record: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StandardizedRecordResponse {
    /// Exactly the canonical fields, in form order.
    pub record: Map<String, Value>,
    pub missing_critical: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StandardizeBatchParams {
    pub records: Vec<Value>,
    /// Replace the session's case list with the standardized records (default: false).
    #[serde(default)]
    pub replace_cases: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BatchResponse {
    pub records: Vec<Map<String, Value>>,
    /// Skipped records, with the reason and the critical fields still blank.
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AliasEntry {
    pub alias: String,
    pub standard_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MappingResponse {
    /// Sorted by standard key, then alias.
    pub entries: Vec<AliasEntry>,
    /// Aliases whose target is not a canonical field; they have no effect.
    pub dangling: Vec<AliasEntry>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateMappingParams {
    /// Entries to add or overwrite, applied in order (last write wins).
    #[serde(default)]
    pub upsert: Vec<AliasEntry>,
    /// Aliases to delete.
    #[serde(default)]
    pub remove: Vec<String>,
    /// Start from the built-in alias table before applying edits.
    #[serde(default)]
    pub reset_to_defaults: bool,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UploadParams {
    /// Original file name; `.json` or `.csv` selects the parser.
    pub file_name: String,
    /// File content as UTF-8 text.
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ImportMappingParams {
    pub file_name: String,
    pub content: String,
    /// Replace the whole table instead of merging into it (default: merge).
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatasetSummary {
    pub id: String,
    pub title: String,
    /// Number of cases or checklist items.
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatasetListResponse {
    pub tw_cases: Vec<DatasetSummary>,
    pub k510_checklists: Vec<DatasetSummary>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DatasetParams {
    pub dataset_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChecklistResponse {
    pub title: String,
    pub items: Vec<ChecklistItem>,
    pub markdown: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListGuidanceParams {
    /// Restrict to one domain; both when omitted.
    pub domain: Option<GuidanceDomain>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GuidanceSummary {
    pub id: String,
    pub title: String,
    pub domain: GuidanceDomain,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GuidanceListResponse {
    pub documents: Vec<GuidanceSummary>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GuidanceIdParams {
    /// Document id such as "tw_guidance_suture" or "k510_guidance_review_memo".
    pub guidance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GuidanceDetailResponse {
    pub document: GuidanceDocument,
    pub structured: StructuredGuidance,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MergeGuidanceParams {
    pub domain: GuidanceDomain,
    /// Library documents to merge, in order.
    #[serde(default)]
    pub guidance_ids: Vec<String>,
    /// Additional markdown documents appended after the library documents.
    #[serde(default)]
    pub documents: Vec<String>,
    /// Reviewer rules appended under their own heading.
    #[serde(default)]
    pub extra_rules: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MergeGuidanceResponse {
    pub markdown: String,
    pub fingerprint: String,
    pub structured: StructuredGuidance,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StructureGuidanceParams {
    /// Markdown to structure. When omitted, the domain's effective guidance is used.
    pub markdown: Option<String>,
    pub domain: Option<GuidanceDomain>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StructuredGuidanceResponse {
    pub structured: StructuredGuidance,
    pub summary_csv: String,
    pub required_documents_csv: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DiffGuidanceParams {
    pub a: String,
    pub b: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub model: String,
    pub category: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentListResponse {
    pub agents: Vec<AgentSummary>,
    /// The full configuration as YAML.
    pub yaml: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AgentsYamlParams {
    pub yaml: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunAgentParams {
    pub agent_id: String,
    /// Instruction placed before the input.
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub input: String,
    /// Overrides the agent's configured model.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunAgentResponse {
    pub agent_id: String,
    pub provider: Provider,
    pub model: String,
    pub output: String,
    pub tokens_est: u64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TwScreenReviewParams {
    /// Reviewer instruction; the built-in screening prompt in the session language when omitted.
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StructureK510SubmissionParams {
    /// Raw 510(k) submission material (text or markdown).
    pub submission: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BuildK510ReviewParams {
    /// Edited structured submission; the stored one when omitted.
    pub structured_submission: Option<String>,
    /// Checklist text; the session checklist as a markdown table when omitted.
    pub checklist_markdown: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineStepResponse {
    pub provider: Provider,
    pub model: String,
    pub output: String,
    pub tokens_est: u64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExtractKeywordsParams {
    pub note: String,
    /// CSS color of highlighted keywords (default #FF7F50).
    pub color: Option<String>,
    /// Overrides the keyword agent's model.
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeywordsResponse {
    pub keywords: Vec<String>,
    /// The note, HTML-escaped, with keywords wrapped in colored spans.
    pub highlighted_html: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HighlightKeywordsParams {
    pub text: String,
    pub keywords: Vec<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ResetWorkflowParams {
    /// Input to the first step.
    #[serde(default)]
    pub input: String,
    /// Replace the step list; the default two-step chain when omitted.
    pub steps: Option<Vec<WorkflowStep>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowResponse {
    pub workflow: Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowStepResponse {
    pub step_index: usize,
    pub status: StepStatus,
    pub output: String,
    /// Index of the next step to run.
    pub cursor: usize,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EditWorkflowOutputParams {
    pub step_index: usize,
    pub output: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SetApplicationParams {
    /// Raw record to standardize into the application under review.
    pub record: Option<Value>,
    /// Select a case of the loaded dataset instead.
    pub case_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApplicationResponse {
    pub record: Map<String, Value>,
    pub completeness: f64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ApplicationReportResponse {
    pub completeness: f64,
    pub report: MissingItemsReport,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SaveCompanyTemplateParams {
    pub template_name: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ApplyCompanyTemplateParams {
    pub template_name: String,
    /// Apply to every loaded case instead of only the application under review.
    #[serde(default)]
    pub all_cases: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct CompanyTemplatesResponse {
    pub templates: Vec<CompanyTemplate>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExportParams {
    pub target: ExportTarget,
    pub format: ExportFormat,
    /// Guidance domain for guidance exports (default: tw).
    pub domain: Option<GuidanceDomain>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HistoryResponse {
    pub events: Vec<HistoryEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClearHistoryResponse {
    /// Number of events dropped.
    pub cleared: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UsageResponse {
    pub stats: UsageStats,
    pub token_budget_est: u64,
    /// Estimated tokens used over the budget, capped at 1.
    pub budget_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReloadResponse {
    pub tw_cases: usize,
    pub k510_checklists: usize,
    pub guidance: usize,
    pub warnings: Vec<String>,
}
