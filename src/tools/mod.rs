pub mod daily_reflection;
pub mod ingest_transcript;
pub mod journal_stats;
pub mod query_events;
pub mod reset_chunk;

use daily_reflection::DailyReflectionParams;
use ingest_transcript::IngestTranscriptParams;
use journal_stats::JournalStatsParams;
use query_events::QueryEventsParams;
use reset_chunk::ResetChunkParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use std::sync::Arc;

use dayweave::error::AnalysisError;
use dayweave::journal::transcript::{parse_day, parse_time};
use dayweave::journal::{IngestRequest, Orchestrator};

/// The dayweave MCP tool handler. Holds the shared orchestrator and exposes
/// all MCP tools via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct DayweaveTools {
    tool_router: ToolRouter<Self>,
    orchestrator: Arc<Orchestrator>,
}

/// Render a domain error for the client, marking the ones worth retrying.
fn describe(context: &str, e: AnalysisError) -> String {
    if e.is_retryable() {
        format!("{context}: {e} (retryable)")
    } else {
        format!("{context}: {e}")
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("serialization failed: {e}"))
}

#[tool_router]
impl DayweaveTools {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            orchestrator,
        }
    }

    fn username(&self, given: Option<String>) -> String {
        given
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.orchestrator.config().server.default_username.clone())
    }

    /// Fold transcript text into the user's day, one fragment per time marker.
    #[tool(description = "Submit transcript text for a day. Text with several time markers is split at each marker and processed in time order. Each fragment either extends the event in effect at its time or starts a new one. Returns summed counts of new/updated events and the day's total. Re-sending the same text is a no-op.")]
    async fn ingest_transcript(
        &self,
        Parameters(params): Parameters<IngestTranscriptParams>,
    ) -> Result<String, String> {
        let day = parse_day(&params.day).map_err(|e| describe("invalid day", e))?;
        let observed_at = params
            .observed_at
            .as_deref()
            .map(|raw| parse_time(raw, day))
            .transpose()
            .map_err(|e| describe("invalid observed_at", e))?;
        let username = self.username(params.username);

        tracing::info!(
            username = %username,
            day = %day,
            text_len = params.text.len(),
            "ingest_transcript called"
        );

        let outcome = self
            .orchestrator
            .ingest(IngestRequest {
                username,
                day,
                text: params.text,
                observed_at,
                chunk_id: params.chunk_id,
            })
            .await
            .map_err(|e| describe("ingest failed", e))?;

        to_json(&outcome)
    }

    /// Read back a day's events in time order.
    #[tool(description = "List the events of a user's day in time order, with title, summary, place, activity, people and scores.")]
    async fn query_events(
        &self,
        Parameters(params): Parameters<QueryEventsParams>,
    ) -> Result<String, String> {
        let day = parse_day(&params.day).map_err(|e| describe("invalid day", e))?;
        let username = self.username(params.username);
        tracing::info!(username = %username, day = %day, "query_events called");

        let view = self
            .orchestrator
            .query_day(&username, day)
            .await
            .map_err(|e| describe("query failed", e))?;
        to_json(&view)
    }

    /// Day-level aggregate over all events.
    #[tool(description = "Get the daily reflection for a user's day: duration-weighted mood, stress and energy plus one highlight per event.")]
    async fn daily_reflection(
        &self,
        Parameters(params): Parameters<DailyReflectionParams>,
    ) -> Result<String, String> {
        let day = parse_day(&params.day).map_err(|e| describe("invalid day", e))?;
        let username = self.username(params.username);
        tracing::info!(username = %username, day = %day, "daily_reflection called");

        let reflection = self
            .orchestrator
            .daily_reflection(&username, day)
            .await
            .map_err(|e| describe("reflection failed", e))?;
        to_json(&reflection)
    }

    /// Put a failed chunk back in the queue.
    #[tool(description = "Reset a failed transcript chunk to pending so the background processor retries it.")]
    async fn reset_chunk(
        &self,
        Parameters(params): Parameters<ResetChunkParams>,
    ) -> Result<String, String> {
        tracing::info!(chunk_id = %params.chunk_id, "reset_chunk called");

        let chunk = self
            .orchestrator
            .reset_chunk(&params.chunk_id)
            .await
            .map_err(|e| describe("reset failed", e))?;
        Ok(serde_json::json!({
            "chunk_id": chunk.id,
            "status": chunk.status,
            "retry_count": chunk.retry_count,
        })
        .to_string())
    }

    /// Get statistics about the journal store.
    #[tool(description = "Get journal statistics: event counts by activity, chunk counts by status, users, days, storage size.")]
    async fn journal_stats(
        &self,
        Parameters(params): Parameters<JournalStatsParams>,
    ) -> Result<String, String> {
        tracing::info!(username = ?params.username, "journal_stats called");

        let stats = self
            .orchestrator
            .stats(params.username)
            .await
            .map_err(|e| describe("stats failed", e))?;
        to_json(&stats)
    }
}

#[tool_handler]
impl ServerHandler for DayweaveTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Dayweave turns a running transcript of someone's day into merged events. \
                 Send fragments in order with ingest_transcript, read the day with \
                 query_events, and summarize it with daily_reflection."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
