use std::sync::Arc;

use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use submission_common::history::estimate_tokens;
use submission_common::mcp_api::{
    ModelCatalogResponse, ProviderKeyStatus, ProviderModels, ProviderStatusResponse,
    SetApiKeyParams, TextResponse,
};
use submission_common::provider::Provider;
use submission_common::router::{Completion, CompletionRequest, LlmRouter};

use crate::agents::{parse_standardized_yaml, standardization_request, AgentsConfig};
use crate::api::*;
use crate::checklist::{checklist_to_markdown, parse_checklist_upload};
use crate::config::{check_max_tokens, check_temperature};
use crate::export::{ExportFile, UploadFormat};
use crate::guidance::{self, fingerprint};
use crate::mapping::{self, standardize, standardize_batch, AliasTable, BatchOutcome};
use crate::model::{ApplicationRecord, GuidanceDomain};
use crate::reports::{completeness, missing_items_report, parse_templates_upload, CompanyTemplate};
use crate::notes::{self, highlight_keywords_html, parse_keywords, DEFAULT_HIGHLIGHT_COLOR, KEYWORD_AGENT};
use crate::session::{SessionState, StepStatus, Workflow, TW_SCREEN_AGENT};

#[derive(Clone)]
pub struct SubmissionWorkspaceServer {
    state: Arc<RwLock<SessionState>>,
    router: Arc<LlmRouter>,
    tool_router: ToolRouter<SubmissionWorkspaceServer>,
}

impl SubmissionWorkspaceServer {
    pub fn new(state: SessionState, router: Arc<LlmRouter>) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            router,
            tool_router: Self::tool_router(),
        }
    }

    /// Call the provider without holding the session lock.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, String> {
        let credentials = self.state.read().await.credentials.clone();
        self.router
            .complete(request, &credentials)
            .await
            .map_err(|e| format!("completion failed: {e}"))
    }

    /// Run a fixed pipeline step and log it to the session history.
    async fn run_pipeline_step(
        &self,
        tab: &str,
        agent: &str,
        request: &CompletionRequest,
    ) -> Result<PipelineStepResponse, String> {
        let completion = self.complete(request).await?;
        let tokens_est = estimate_tokens(&format!("{}{}", request.user_prompt, completion.text));
        self.state
            .write()
            .await
            .history
            .record(tab, agent, &completion.model, tokens_est, None);
        Ok(PipelineStepResponse {
            provider: completion.provider,
            model: completion.model,
            output: completion.text,
            tokens_est,
        })
    }
}

fn batch_response(outcome: &BatchOutcome) -> BatchResponse {
    BatchResponse {
        records: outcome.records.iter().map(ApplicationRecord::to_json_map).collect(),
        failures: outcome.failures.clone(),
    }
}

fn mapping_response(table: &AliasTable) -> MappingResponse {
    let entry = |(alias, standard_key): (&str, &str)| AliasEntry {
        alias: alias.to_string(),
        standard_key: standard_key.to_string(),
    };
    MappingResponse {
        entries: table
            .to_rows()
            .into_iter()
            .map(|(alias, standard_key)| AliasEntry { alias, standard_key })
            .collect(),
        dangling: table.dangling().into_iter().map(entry).collect(),
    }
}

fn application_response(record: &ApplicationRecord) -> ApplicationResponse {
    ApplicationResponse {
        record: record.to_json_map(),
        completeness: completeness(record),
    }
}

fn agent_list(agents: &AgentsConfig) -> Result<AgentListResponse, String> {
    Ok(AgentListResponse {
        agents: agents
            .agents
            .iter()
            .map(|(id, spec)| AgentSummary {
                id: id.clone(),
                name: spec.name.clone(),
                model: spec.model.clone(),
                category: spec.category.clone(),
                description: spec.description.clone().or_else(|| spec.description_tw.clone()),
            })
            .collect(),
        yaml: agents.to_yaml_string().map_err(|e| e.to_string())?,
    })
}

fn structured_response(markdown: &str) -> StructuredGuidanceResponse {
    let structured = guidance::structure(markdown);
    StructuredGuidanceResponse {
        summary_csv: structured.to_summary_csv(),
        required_documents_csv: structured.required_documents_csv(),
        structured,
    }
}

#[tool_router]
impl SubmissionWorkspaceServer {
    #[tool(description = "List selectable LLM models grouped by provider, plus the session's default model.")]
    async fn list_models(&self) -> Result<Json<ModelCatalogResponse>, String> {
        let state = self.state.read().await;
        Ok(Json(ModelCatalogResponse {
            default_model: state.settings.model.clone(),
            providers: Provider::ALL
                .into_iter()
                .map(|provider| ProviderModels {
                    provider,
                    models: provider.models().iter().map(|m| m.to_string()).collect(),
                })
                .collect(),
        }))
    }

    #[tool(description = "Report where each provider's API key comes from: env, session or missing. Keys are never returned.")]
    async fn provider_status(&self) -> Result<Json<ProviderStatusResponse>, String> {
        let state = self.state.read().await;
        Ok(Json(ProviderStatusResponse {
            providers: Provider::ALL
                .into_iter()
                .map(|provider| ProviderKeyStatus {
                    provider,
                    env_var: provider.env_var().to_string(),
                    status: state.credentials.status(provider),
                })
                .collect(),
        }))
    }

    #[tool(description = "Set (or with an empty key, clear) a session API key for one provider.")]
    async fn set_api_key(
        &self,
        Parameters(params): Parameters<SetApiKeyParams>,
    ) -> Result<Json<ProviderKeyStatus>, String> {
        let provider = Provider::parse(&params.provider)
            .ok_or_else(|| format!("unknown provider: {}", params.provider))?;
        let mut state = self.state.write().await;
        state.credentials.set(provider, &params.api_key);
        info!(provider = %provider, "session api key updated");
        Ok(Json(ProviderKeyStatus {
            provider,
            env_var: provider.env_var().to_string(),
            status: state.credentials.status(provider),
        }))
    }

    #[tool(description = "Change session settings: language, default model, max_tokens and temperature (0 to 2).")]
    async fn update_settings(
        &self,
        Parameters(params): Parameters<UpdateSettingsParams>,
    ) -> Result<Json<SettingsResponse>, String> {
        if let Some(model) = &params.model {
            Provider::for_model(model).map_err(|e| e.to_string())?;
        }
        if let Some(t) = params.temperature {
            check_temperature(t)?;
        }
        if let Some(m) = params.max_tokens {
            check_max_tokens(m)?;
        }

        let mut state = self.state.write().await;
        if let Some(language) = params.language {
            state.settings.language = language;
        }
        if let Some(model) = params.model {
            state.settings.model = model;
        }
        if let Some(max_tokens) = params.max_tokens {
            state.settings.max_tokens = max_tokens;
        }
        if let Some(temperature) = params.temperature {
            state.settings.temperature = temperature;
        }
        Ok(Json(SettingsResponse {
            settings: state.settings.clone(),
        }))
    }

    #[tool(description = "Standardize one raw record into the canonical TW application schema using the session alias table.")]
    async fn standardize_record(
        &self,
        Parameters(params): Parameters<StandardizeRecordParams>,
    ) -> Result<Json<StandardizedRecordResponse>, String> {
        let state = self.state.read().await;
        let record = standardize(&params.record, &state.aliases, &state.mapping_policy);
        Ok(Json(StandardizedRecordResponse {
            missing_critical: record.missing_critical().iter().map(|f| f.to_string()).collect(),
            record: record.to_json_map(),
        }))
    }

    #[tool(description = "Standardize many raw records. Records with several populated values but most critical fields unmapped are reported as failures instead of returned.")]
    async fn standardize_batch(
        &self,
        Parameters(params): Parameters<StandardizeBatchParams>,
    ) -> Result<Json<BatchResponse>, String> {
        let mut state = self.state.write().await;
        let outcome = standardize_batch(&params.records, &state.aliases, &state.mapping_policy);
        if params.replace_cases {
            state.replace_cases(outcome.records.clone());
        }
        Ok(Json(batch_response(&outcome)))
    }

    #[tool(description = "Show the session alias table (alias -> canonical field) and any aliases pointing at unknown fields.")]
    async fn get_field_mapping(&self) -> Result<Json<MappingResponse>, String> {
        let state = self.state.read().await;
        Ok(Json(mapping_response(&state.aliases)))
    }

    #[tool(description = "Edit the alias table: optionally reset to the built-in table, then remove aliases, then upsert entries (last write wins).")]
    async fn update_field_mapping(
        &self,
        Parameters(params): Parameters<UpdateMappingParams>,
    ) -> Result<Json<MappingResponse>, String> {
        let mut state = self.state.write().await;
        if params.reset_to_defaults {
            state.aliases = AliasTable::with_defaults();
        }
        for alias in &params.remove {
            state.aliases.remove(alias);
        }
        state.aliases.extend(
            params
                .upsert
                .into_iter()
                .map(|e| (e.alias.trim().to_string(), e.standard_key.trim().to_string()))
                .filter(|(alias, key)| !alias.is_empty() && !key.is_empty()),
        );
        Ok(Json(mapping_response(&state.aliases)))
    }

    #[tool(description = "Import an alias table from an uploaded JSON or CSV file, merging into or replacing the session table.")]
    async fn import_field_mapping(
        &self,
        Parameters(params): Parameters<ImportMappingParams>,
    ) -> Result<Json<MappingResponse>, String> {
        let format = UploadFormat::from_file_name(&params.file_name).map_err(|e| e.to_string())?;
        let imported = AliasTable::parse_upload(&params.content, format).map_err(|e| e.to_string())?;
        if imported.is_empty() {
            return Err("upload contained no alias entries".to_string());
        }

        let mut state = self.state.write().await;
        if params.replace {
            state.aliases = imported;
        } else {
            state.aliases.extend(imported.to_rows());
        }
        info!(aliases = state.aliases.len(), replace = params.replace, "field mapping imported");
        Ok(Json(mapping_response(&state.aliases)))
    }

    #[tool(description = "Parse an uploaded JSON or CSV case file, standardize every record, and make the result the session's case list.")]
    async fn parse_cases_upload(
        &self,
        Parameters(params): Parameters<UploadParams>,
    ) -> Result<Json<BatchResponse>, String> {
        let format = UploadFormat::from_file_name(&params.file_name).map_err(|e| e.to_string())?;
        let raw = mapping::parse_cases_upload(&params.content, format).map_err(|e| e.to_string())?;

        let mut state = self.state.write().await;
        let outcome = standardize_batch(&raw, &state.aliases, &state.mapping_policy);
        state.replace_cases(outcome.records.clone());
        info!(
            file = %params.file_name,
            records = outcome.records.len(),
            failures = outcome.failures.len(),
            "cases uploaded"
        );
        Ok(Json(batch_response(&outcome)))
    }

    #[tool(description = "List the default TW case datasets and 510(k) checklists, with any loader warnings.")]
    async fn list_datasets(&self) -> Result<Json<DatasetListResponse>, String> {
        let state = self.state.read().await;
        Ok(Json(DatasetListResponse {
            tw_cases: state
                .datasets
                .tw_cases
                .iter()
                .map(|(id, set)| DatasetSummary {
                    id: id.clone(),
                    title: set.title.clone(),
                    size: set.cases.len(),
                })
                .collect(),
            k510_checklists: state
                .datasets
                .k510_checklists
                .iter()
                .map(|(id, set)| DatasetSummary {
                    id: id.clone(),
                    title: set.title.clone(),
                    size: set.items.len(),
                })
                .collect(),
            warnings: state.warnings.clone(),
        }))
    }

    #[tool(description = "Load a default TW dataset as the session's case list; its first case becomes the application under review.")]
    async fn load_tw_dataset(
        &self,
        Parameters(params): Parameters<DatasetParams>,
    ) -> Result<Json<BatchResponse>, String> {
        let mut state = self.state.write().await;
        let outcome = state.load_tw_dataset(&params.dataset_id).map_err(|e| e.to_string())?;
        Ok(Json(batch_response(&outcome)))
    }

    #[tool(description = "Select a default 510(k) checklist as the session checklist and render it as a markdown table.")]
    async fn get_checklist(
        &self,
        Parameters(params): Parameters<DatasetParams>,
    ) -> Result<Json<ChecklistResponse>, String> {
        let mut state = self.state.write().await;
        let set = state.checklist_set(&params.dataset_id).map_err(|e| e.to_string())?;
        let (title, items) = (set.title.clone(), set.items.clone());
        state.checklist = items.clone();
        Ok(Json(ChecklistResponse {
            title,
            markdown: checklist_to_markdown(&items),
            items,
        }))
    }

    #[tool(description = "Parse an uploaded JSON or CSV 510(k) checklist and make it the session checklist.")]
    async fn parse_checklist_upload(
        &self,
        Parameters(params): Parameters<UploadParams>,
    ) -> Result<Json<ChecklistResponse>, String> {
        let format = UploadFormat::from_file_name(&params.file_name).map_err(|e| e.to_string())?;
        let items = parse_checklist_upload(&params.content, format).map_err(|e| e.to_string())?;

        let mut state = self.state.write().await;
        state.checklist = items.clone();
        Ok(Json(ChecklistResponse {
            title: params.file_name,
            markdown: checklist_to_markdown(&items),
            items,
        }))
    }

    #[tool(description = "List guidance documents in the library, optionally for one domain (tw or k510).")]
    async fn list_guidance(
        &self,
        Parameters(params): Parameters<ListGuidanceParams>,
    ) -> Result<Json<GuidanceListResponse>, String> {
        let state = self.state.read().await;
        let library = &state.guidance;
        let domains = match params.domain {
            Some(domain) => vec![domain],
            None => vec![GuidanceDomain::Tw, GuidanceDomain::K510],
        };
        let documents = domains
            .into_iter()
            .flat_map(move |domain| {
                library.domain(domain).iter().map(move |doc| GuidanceSummary {
                    id: doc.id.clone(),
                    title: doc.title.clone(),
                    domain,
                    fingerprint: doc.fingerprint.clone(),
                })
            })
            .collect();
        Ok(Json(GuidanceListResponse { documents }))
    }

    #[tool(description = "Return one guidance document with its structured sections.")]
    async fn get_guidance(
        &self,
        Parameters(params): Parameters<GuidanceIdParams>,
    ) -> Result<Json<GuidanceDetailResponse>, String> {
        let state = self.state.read().await;
        let document = state
            .guidance
            .require(&params.guidance_id)
            .map_err(|e| e.to_string())?
            .clone();
        Ok(Json(GuidanceDetailResponse {
            structured: guidance::structure(&document.markdown),
            document,
        }))
    }

    #[tool(description = "Merge library documents and ad-hoc markdown (in order) plus extra reviewer rules; the result becomes the domain's effective guidance.")]
    async fn merge_guidance(
        &self,
        Parameters(params): Parameters<MergeGuidanceParams>,
    ) -> Result<Json<MergeGuidanceResponse>, String> {
        let mut state = self.state.write().await;
        let mut documents = Vec::with_capacity(params.guidance_ids.len() + params.documents.len());
        for id in &params.guidance_ids {
            let doc = state.guidance.require(id).map_err(|e| e.to_string())?;
            documents.push(doc.markdown.clone());
        }
        documents.extend(params.documents);

        let markdown = guidance::merge(&documents, &params.extra_rules);
        state.set_effective_guidance(params.domain, markdown.clone());
        info!(
            domain = ?params.domain,
            documents = documents.len(),
            chars = markdown.len(),
            "effective guidance updated"
        );
        Ok(Json(MergeGuidanceResponse {
            fingerprint: fingerprint(&markdown),
            structured: guidance::structure(&markdown),
            markdown,
        }))
    }

    #[tool(description = "Extract purpose, required documents, consistency checks, common defects and output format from markdown (or the domain's effective guidance).")]
    async fn structure_guidance(
        &self,
        Parameters(params): Parameters<StructureGuidanceParams>,
    ) -> Result<Json<StructuredGuidanceResponse>, String> {
        if let Some(markdown) = &params.markdown {
            return Ok(Json(structured_response(markdown)));
        }
        let state = self.state.read().await;
        let domain = params.domain.unwrap_or(GuidanceDomain::Tw);
        Ok(Json(structured_response(state.effective_guidance(domain))))
    }

    #[tool(description = "Unified line diff between two markdown texts; empty when they are identical.")]
    async fn diff_guidance(
        &self,
        Parameters(params): Parameters<DiffGuidanceParams>,
    ) -> Result<Json<TextResponse>, String> {
        Ok(Json(TextResponse {
            text: guidance::diff(&params.a, &params.b),
        }))
    }

    #[tool(description = "List configured agents and return the full configuration as YAML.")]
    async fn list_agents(&self) -> Result<Json<AgentListResponse>, String> {
        let state = self.state.read().await;
        Ok(Json(agent_list(&state.agents)?))
    }

    #[tool(description = "Replace the agent configuration with the given agents.yaml text; missing built-in agents are back-filled.")]
    async fn update_agents_yaml(
        &self,
        Parameters(params): Parameters<AgentsYamlParams>,
    ) -> Result<Json<AgentListResponse>, String> {
        let agents = AgentsConfig::from_yaml_str(&params.yaml)
            .map_err(|e| e.to_string())?
            .with_defaults();
        let mut state = self.state.write().await;
        state.agents = agents;
        Ok(Json(agent_list(&state.agents)?))
    }

    #[tool(description = "Ask the default model to rewrite an agent configuration in any format into the standard agents.yaml layout, then apply it.")]
    async fn standardize_agents_yaml(
        &self,
        Parameters(params): Parameters<AgentsYamlParams>,
    ) -> Result<Json<AgentListResponse>, String> {
        if params.yaml.trim().is_empty() {
            return Err("yaml must not be empty".to_string());
        }
        let model = self.state.read().await.settings.model.clone();
        let request = standardization_request(&params.yaml, &model);
        let completion = self.complete(&request).await?;
        let agents = parse_standardized_yaml(&completion.text)
            .map_err(|e| format!("model returned unusable YAML: {e}"))?
            .with_defaults();

        let mut state = self.state.write().await;
        state.history.record(
            "agents",
            "agent_standardizer",
            &completion.model,
            estimate_tokens(&format!("{}{}", request.user_prompt, completion.text)),
            None,
        );
        state.agents = agents;
        Ok(Json(agent_list(&state.agents)?))
    }

    #[tool(description = "Run one configured agent on a prompt and input. The agent's model and max_tokens apply unless overridden.")]
    async fn run_agent(
        &self,
        Parameters(params): Parameters<RunAgentParams>,
    ) -> Result<Json<RunAgentResponse>, String> {
        let request = self
            .state
            .read()
            .await
            .agent_request(
                &params.agent_id,
                &params.prompt,
                &params.input,
                params.model.as_deref(),
                params.max_tokens,
            )
            .map_err(|e| e.to_string())?;

        let completion = self.complete(&request).await?;
        let tokens_est = estimate_tokens(&format!("{}{}", request.user_prompt, completion.text));
        self.state.write().await.history.record(
            "agents",
            &params.agent_id,
            &completion.model,
            tokens_est,
            Some(json!({ "agent_id": params.agent_id })),
        );
        Ok(Json(RunAgentResponse {
            agent_id: params.agent_id,
            provider: completion.provider,
            model: completion.model,
            output: completion.text,
            tokens_est,
        }))
    }

    #[tool(description = "Start the agent workflow over with new input, optionally replacing its steps (default: PDF to Markdown, then 510(k) intelligence).")]
    async fn reset_workflow(
        &self,
        Parameters(params): Parameters<ResetWorkflowParams>,
    ) -> Result<Json<WorkflowResponse>, String> {
        let mut state = self.state.write().await;
        let steps = match params.steps {
            Some(steps) if !steps.is_empty() => steps,
            _ => Workflow::default_steps(&state.settings),
        };
        state.workflow.restart(steps, params.input);
        Ok(Json(WorkflowResponse {
            workflow: state.workflow.clone(),
        }))
    }

    #[tool(description = "Run the next workflow step on the previous step's (possibly edited) output. Output is discarded if the workflow was reset meanwhile.")]
    async fn run_workflow_step(&self) -> Result<Json<WorkflowStepResponse>, String> {
        let run = self
            .state
            .read()
            .await
            .workflow_request()
            .map_err(|e| e.to_string())?;

        let completion = match self.complete(&run.request).await {
            Ok(c) => c,
            Err(e) => {
                warn!(step = run.index, error = %e, "workflow step failed");
                let mut state = self.state.write().await;
                if let Err(stale) = state.workflow.record_error(run.generation, run.index, e.clone()) {
                    warn!(step = run.index, error = %stale, "workflow step error not recorded");
                }
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        state.history.record(
            "workflow",
            &run.name,
            &completion.model,
            estimate_tokens(&format!("{}{}", run.request.user_prompt, completion.text)),
            Some(json!({ "workflow_step": run.index })),
        );
        state
            .workflow
            .record_output(run.generation, run.index, completion.text.clone())
            .map_err(|e| e.to_string())?;
        Ok(Json(WorkflowStepResponse {
            step_index: run.index,
            status: state
                .workflow
                .statuses
                .get(run.index)
                .cloned()
                .unwrap_or(StepStatus::Idle),
            output: completion.text,
            cursor: state.workflow.cursor,
        }))
    }

    #[tool(description = "Replace a workflow step's output; the next step reads the edited text.")]
    async fn edit_workflow_output(
        &self,
        Parameters(params): Parameters<EditWorkflowOutputParams>,
    ) -> Result<Json<WorkflowResponse>, String> {
        let mut state = self.state.write().await;
        state
            .workflow
            .edit_output(params.step_index, params.output)
            .map_err(|e| e.to_string())?;
        Ok(Json(WorkflowResponse {
            workflow: state.workflow.clone(),
        }))
    }

    #[tool(description = "Screen-review the application under review with the TW screening agent. Input is the application draft plus the effective TW guidance (or a note that none was set).")]
    async fn run_tw_screen_review(
        &self,
        Parameters(params): Parameters<TwScreenReviewParams>,
    ) -> Result<Json<RunAgentResponse>, String> {
        let request = self
            .state
            .read()
            .await
            .tw_screen_request(params.prompt.as_deref(), params.model.as_deref(), params.max_tokens)
            .map_err(|e| e.to_string())?;
        let step = self
            .run_pipeline_step("tw_premarket", TW_SCREEN_AGENT, &request)
            .await?;
        Ok(Json(RunAgentResponse {
            agent_id: TW_SCREEN_AGENT.to_string(),
            provider: step.provider,
            model: step.model,
            output: step.output,
            tokens_est: step.tokens_est,
        }))
    }

    #[tool(description = "510(k) step 1: reorganize raw submission material into structured markdown. The result is kept for build_k510_review.")]
    async fn structure_k510_submission(
        &self,
        Parameters(params): Parameters<StructureK510SubmissionParams>,
    ) -> Result<Json<PipelineStepResponse>, String> {
        let request = self
            .state
            .read()
            .await
            .k510_structure_request(&params.submission)
            .map_err(|e| e.to_string())?;
        let step = self
            .run_pipeline_step("k510_review", "submission_structurer", &request)
            .await?;
        self.state.write().await.k510.structured_submission = step.output.clone();
        Ok(Json(step))
    }

    #[tool(description = "510(k) step 2: draft a review memo from the effective 510(k) guidance, the checklist and the structured submission (each overridable).")]
    async fn build_k510_review(
        &self,
        Parameters(params): Parameters<BuildK510ReviewParams>,
    ) -> Result<Json<PipelineStepResponse>, String> {
        let request = self
            .state
            .read()
            .await
            .k510_review_request(
                params.structured_submission.as_deref(),
                params.checklist_markdown.as_deref(),
            )
            .map_err(|e| e.to_string())?;
        let step = self
            .run_pipeline_step("k510_review", "review_memo_builder", &request)
            .await?;

        let mut state = self.state.write().await;
        if let Some(edited) = params.structured_submission.filter(|s| !s.trim().is_empty()) {
            state.k510.structured_submission = edited;
        }
        state.k510.report = step.output.clone();
        Ok(Json(step))
    }

    #[tool(description = "Ask the keyword agent for a note's 10-15 key terms and return them with the note highlighted as HTML.")]
    async fn extract_keywords(
        &self,
        Parameters(params): Parameters<ExtractKeywordsParams>,
    ) -> Result<Json<KeywordsResponse>, String> {
        if params.note.trim().is_empty() {
            return Err("note must not be empty".to_string());
        }
        let request = {
            let state = self.state.read().await;
            let agent = state.agents.get(KEYWORD_AGENT).map_err(|e| e.to_string())?;
            let model = params
                .model
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| agent.model.clone());
            notes::keyword_request(&params.note, &agent.system_prompt, &model)
        };
        let step = self
            .run_pipeline_step("note_keeper", KEYWORD_AGENT, &request)
            .await?;
        let keywords = parse_keywords(&step.output)
            .map_err(|e| format!("model returned unusable keywords: {e}"))?;
        let color = params.color.as_deref().unwrap_or(DEFAULT_HIGHLIGHT_COLOR);
        Ok(Json(KeywordsResponse {
            highlighted_html: highlight_keywords_html(&params.note, &keywords, color),
            keywords,
        }))
    }

    #[tool(description = "HTML-escape text and highlight the given keywords in colored bold spans.")]
    async fn highlight_keywords(
        &self,
        Parameters(params): Parameters<HighlightKeywordsParams>,
    ) -> Result<Json<TextResponse>, String> {
        let color = params.color.as_deref().unwrap_or(DEFAULT_HIGHLIGHT_COLOR);
        Ok(Json(TextResponse {
            text: highlight_keywords_html(&params.text, &params.keywords, color),
        }))
    }

    #[tool(description = "Set the application under review from a raw record or from a loaded case by index.")]
    async fn set_application(
        &self,
        Parameters(params): Parameters<SetApplicationParams>,
    ) -> Result<Json<ApplicationResponse>, String> {
        let mut state = self.state.write().await;
        match (params.record, params.case_index) {
            (Some(raw), _) => {
                let record = standardize(&raw, &state.aliases, &state.mapping_policy);
                state.application = record;
            }
            (None, Some(i)) => {
                let case = state
                    .cases
                    .get(i)
                    .cloned()
                    .ok_or_else(|| format!("no case at index {i} ({} loaded)", state.cases.len()))?;
                state.application = case;
                state.active_case = i;
            }
            (None, None) => return Err("provide either record or case_index".to_string()),
        }
        Ok(Json(application_response(&state.application)))
    }

    #[tool(description = "Completeness score and missing-items report for the application under review, checked against the effective TW guidance.")]
    async fn application_report(&self) -> Result<Json<ApplicationReportResponse>, String> {
        let state = self.state.read().await;
        Ok(Json(ApplicationReportResponse {
            completeness: completeness(&state.application),
            report: missing_items_report(
                &state.application,
                state.effective_guidance(GuidanceDomain::Tw),
                state.settings.language,
            ),
        }))
    }

    #[tool(description = "Save the company fields of the application under review as a named template (replacing one with the same name).")]
    async fn save_company_template(
        &self,
        Parameters(params): Parameters<SaveCompanyTemplateParams>,
    ) -> Result<Json<CompanyTemplatesResponse>, String> {
        if params.template_name.trim().is_empty() {
            return Err("template_name must not be empty".to_string());
        }
        let mut state = self.state.write().await;
        let template = CompanyTemplate::from_record(&params.template_name, &state.application);
        state
            .company_templates
            .retain(|t| t.template_name != template.template_name);
        state.company_templates.push(template);
        Ok(Json(CompanyTemplatesResponse {
            templates: state.company_templates.clone(),
        }))
    }

    #[tool(description = "Import company templates from an uploaded JSON or CSV file.")]
    async fn import_company_templates(
        &self,
        Parameters(params): Parameters<UploadParams>,
    ) -> Result<Json<CompanyTemplatesResponse>, String> {
        let format = UploadFormat::from_file_name(&params.file_name).map_err(|e| e.to_string())?;
        let mut state = self.state.write().await;
        let existing = state.company_templates.len();
        let imported =
            parse_templates_upload(&params.content, format, existing).map_err(|e| e.to_string())?;
        state.company_templates.extend(imported);
        Ok(Json(CompanyTemplatesResponse {
            templates: state.company_templates.clone(),
        }))
    }

    #[tool(description = "Apply a saved company template to the application under review, or to every loaded case.")]
    async fn apply_company_template(
        &self,
        Parameters(params): Parameters<ApplyCompanyTemplateParams>,
    ) -> Result<Json<ApplicationResponse>, String> {
        let mut state = self.state.write().await;
        let template = state
            .company_templates
            .iter()
            .find(|t| t.template_name == params.template_name.trim())
            .cloned()
            .ok_or_else(|| format!("unknown company template: {}", params.template_name))?;

        template.apply_to(&mut state.application);
        if params.all_cases {
            for case in state.cases.iter_mut() {
                template.apply_to(case);
            }
        }
        Ok(Json(application_response(&state.application)))
    }

    #[tool(description = "Render session content for download: application (markdown is the form draft), cases, mapping, checklist, guidance, workflow_output, k510_review or history, as json, csv or markdown.")]
    async fn export(
        &self,
        Parameters(params): Parameters<ExportParams>,
    ) -> Result<Json<ExportFile>, String> {
        let state = self.state.read().await;
        let domain = params.domain.unwrap_or(GuidanceDomain::Tw);
        let file = crate::export::export(&state, params.target, params.format, domain)
            .map_err(|e| e.to_string())?;
        Ok(Json(file))
    }

    #[tool(description = "Every LLM run recorded this session, oldest first.")]
    async fn get_history(&self) -> Result<Json<HistoryResponse>, String> {
        let state = self.state.read().await;
        Ok(Json(HistoryResponse {
            events: state.history.events().to_vec(),
        }))
    }

    #[tool(description = "Drop every recorded LLM run of this session.")]
    async fn clear_history(&self) -> Result<Json<ClearHistoryResponse>, String> {
        let cleared = self.state.write().await.history.clear();
        info!(cleared, "history cleared");
        Ok(Json(ClearHistoryResponse { cleared }))
    }

    #[tool(description = "Requests and estimated tokens per model for this session, against the session token budget.")]
    async fn get_usage_stats(&self) -> Result<Json<UsageResponse>, String> {
        let state = self.state.read().await;
        let stats = state.history.usage_stats();
        let budget = state.settings.token_budget_est;
        let budget_ratio = if budget == 0 {
            0.0
        } else {
            (stats.total_tokens_est as f64 / budget as f64).min(1.0)
        };
        Ok(Json(UsageResponse {
            stats,
            token_budget_est: budget,
            budget_ratio,
        }))
    }

    #[tool(description = "Re-read the default dataset and guidance files, replacing the loaded defaults.")]
    async fn reload_defaults(&self) -> Result<Json<ReloadResponse>, String> {
        let mut state = self.state.write().await;
        let warnings = state.reload_defaults();
        state.warnings = warnings.clone();
        Ok(Json(ReloadResponse {
            tw_cases: state.datasets.tw_cases.len(),
            k510_checklists: state.datasets.k510_checklists.len(),
            guidance: state.guidance.len(),
            warnings,
        }))
    }
}

#[tool_handler]
impl ServerHandler for SubmissionWorkspaceServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "submission-workspace".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Regulatory submission workspace for TW premarket applications and FDA 510(k) \
review. Load cases with load_tw_dataset or parse_cases_upload, tune the alias table with \
get_field_mapping/update_field_mapping, build effective guidance with merge_guidance, and check \
the application with application_report or run_tw_screen_review, and review 510(k) submissions \
with structure_k510_submission then build_k510_review. LLM tools (run_agent, run_workflow_step, \
the review tools, extract_keywords, standardize_agents_yaml) need a provider key: see \
provider_status and set_api_key."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SubmissionWorkspaceServer;

    #[test]
    fn tools_publish_output_schemas() {
        let tools = SubmissionWorkspaceServer::tool_router().list_all();
        for name in [
            "list_models",
            "provider_status",
            "set_api_key",
            "update_settings",
            "standardize_record",
            "standardize_batch",
            "get_field_mapping",
            "update_field_mapping",
            "import_field_mapping",
            "parse_cases_upload",
            "list_datasets",
            "load_tw_dataset",
            "get_checklist",
            "parse_checklist_upload",
            "list_guidance",
            "get_guidance",
            "merge_guidance",
            "structure_guidance",
            "diff_guidance",
            "list_agents",
            "update_agents_yaml",
            "standardize_agents_yaml",
            "run_agent",
            "reset_workflow",
            "run_workflow_step",
            "edit_workflow_output",
            "set_application",
            "application_report",
            "save_company_template",
            "import_company_templates",
            "apply_company_template",
            "export",
            "run_tw_screen_review",
            "structure_k510_submission",
            "build_k510_review",
            "extract_keywords",
            "highlight_keywords",
            "get_history",
            "clear_history",
            "get_usage_stats",
            "reload_defaults",
        ] {
            let tool = tools
                .iter()
                .find(|t| t.name == name)
                .unwrap_or_else(|| panic!("missing tool: {name}"));
            assert!(
                tool.output_schema.is_some(),
                "tool {name} should publish output_schema"
            );
        }
    }
}
