//! MCP server initialization for stdio and Streamable HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that wire up the
//! database, extractor, staging cache and orchestrator into a running server,
//! with the background processor alongside when enabled.

use anyhow::Result;
use dayweave::config::DayweaveConfig;
use dayweave::journal::{processor, Orchestrator};
use dayweave::staging::MemoryStagingCache;
use dayweave::{db, extract};
use rmcp::ServiceExt;
use std::sync::{Arc, Mutex};

use crate::tools::DayweaveTools;

/// Shared setup: open DB, create the extractor, check which extractor produced
/// the stored segmentation.
pub fn setup_shared_state(config: DayweaveConfig) -> Result<Arc<Orchestrator>> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");

    let extractor = extract::create_extractor(&config.extractor)?;
    match db::migrations::get_extractor_provider(&conn) {
        Ok(Some(stored)) if stored != extractor.provider_name() => {
            tracing::warn!(
                stored = %stored,
                configured = %extractor.provider_name(),
                "extractor changed, existing events were segmented by a different provider"
            );
            db::migrations::set_extractor_provider(&conn, extractor.provider_name())?;
        }
        Ok(Some(_)) => {}
        Ok(None) => db::migrations::set_extractor_provider(&conn, extractor.provider_name())?,
        Err(e) => tracing::warn!(error = %e, "could not read stored extractor provider"),
    }
    tracing::info!(provider = extractor.provider_name(), "extractor ready");

    let staging = Arc::new(MemoryStagingCache::from_config(&config.staging));
    let db = Arc::new(Mutex::new(conn));

    Ok(Arc::new(Orchestrator::new(
        db,
        extractor,
        staging,
        Arc::new(config),
    )))
}

fn start_processor(orchestrator: &Arc<Orchestrator>) -> Option<processor::ProcessorHandle> {
    orchestrator
        .config()
        .processor
        .enabled
        .then(|| processor::spawn(Arc::clone(orchestrator)))
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: DayweaveConfig) -> Result<()> {
    tracing::info!("starting dayweave MCP server on stdio");

    let orchestrator = setup_shared_state(config)?;
    let background = start_processor(&orchestrator);

    let tools = DayweaveTools::new(orchestrator);
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    if let Some(handle) = background {
        handle.shutdown().await;
    }
    Ok(())
}

/// Start the MCP server over Streamable HTTP transport.
pub async fn serve_http(config: DayweaveConfig) -> Result<()> {
    let host = config.server.host.clone();
    let port = config.server.port;
    let bind_addr = format!("{host}:{port}");

    tracing::info!(addr = %bind_addr, "starting dayweave MCP server on HTTP");

    let orchestrator = setup_shared_state(config)?;
    let background = start_processor(&orchestrator);

    let shared = Arc::clone(&orchestrator);
    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(DayweaveTools::new(Arc::clone(&shared))),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    if let Some(handle) = background {
        handle.shutdown().await;
    }
    Ok(())
}
