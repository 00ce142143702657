pub mod doctor;
pub mod ingest;
pub mod process;
pub mod query;
pub mod reset;
pub mod stats;

use anyhow::Result;
use std::sync::Arc;

use dayweave::config::DayweaveConfig;
use dayweave::journal::Orchestrator;

/// Build an orchestrator for a one-shot command.
///
/// The reflection is refreshed inline: a deferred task would be dropped when
/// the process exits right after the command.
pub fn orchestrator(config: &DayweaveConfig) -> Result<Arc<Orchestrator>> {
    let mut config = config.clone();
    config.reflection.deferred = false;
    crate::server::setup_shared_state(config)
}

/// The given username, or the configured default.
pub fn resolve_user(config: &DayweaveConfig, user: Option<String>) -> String {
    user.filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| config.server.default_username.clone())
}
