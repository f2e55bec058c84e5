pub mod anthropic;
pub mod error;
pub mod gemini;
pub mod history;
pub mod mcp_api;
pub mod openai;
pub mod provider;
pub mod router;
mod upstream;
