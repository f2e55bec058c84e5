mod agents;
mod api;
mod checklist;
mod config;
mod defaults;
mod error;
mod export;
mod guidance;
mod mapping;
mod model;
mod notes;
mod reports;
mod server;
mod session;

use std::sync::Arc;

use rmcp::{ServiceExt, transport::stdio};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use submission_common::router::{LlmRouter, ProviderConfig};

use config::Config;
use server::SubmissionWorkspaceServer;
use session::SessionState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting submission-workspace MCP server");

    let config = Config::from_env()?;
    info!(
        dataset_path = %config.dataset_path.display(),
        guidance_path = %config.guidance_path.display(),
        agents_path = %config.agents_path.display(),
        default_model = %config.default_model,
        "configuration loaded"
    );

    let provider_config = ProviderConfig::from_env();
    info!(
        timeout_ms = provider_config.default_timeout.as_millis(),
        grok_timeout_ms = provider_config.grok_timeout.as_millis(),
        "llm router configured"
    );
    let router = Arc::new(LlmRouter::new(provider_config)?);

    if let Ok(addr) = std::env::var("MCP_TCP_LISTEN_ADDR") {
        let listener = TcpListener::bind(&addr).await?;
        info!(listen_addr = %addr, "MCP server ready, serving on TCP");
        loop {
            let (stream, peer) = listener.accept().await?;
            // one session per connection
            let server =
                SubmissionWorkspaceServer::new(SessionState::initialize(&config), Arc::clone(&router));
            tokio::spawn(async move {
                tracing::info!(peer = %peer, "MCP client connected");
                let service = server.serve(stream).await.inspect_err(|e| {
                    tracing::error!(error = %e, "MCP server error");
                })?;
                service.waiting().await?;
                tracing::info!(peer = %peer, "MCP client disconnected");
                Ok::<(), anyhow::Error>(())
            });
        }
    } else {
        let server = SubmissionWorkspaceServer::new(SessionState::initialize(&config), router);
        info!("MCP server ready, serving on stdio");
        let service = server.serve(stdio()).await.inspect_err(|e| {
            tracing::error!(error = %e, "MCP server error");
        })?;
        service.waiting().await?;
        info!("MCP server shut down");
    }
    Ok(())
}
