use submission_common::error::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed upload: {0}")]
    Upload(String),

    #[error("cannot export {0}")]
    UnsupportedExport(String),

    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("unknown guidance document: {0}")]
    UnknownGuidance(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("workflow was reset while step {0} was running; output discarded")]
    WorkflowChanged(usize),

    #[error("workflow has no remaining steps")]
    WorkflowExhausted,

    #[error("workflow has no step {0}")]
    UnknownStep(usize),
}
