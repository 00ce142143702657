//! MCP `ingest_transcript` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `ingest_transcript` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IngestTranscriptParams {
    #[schemars(description = "Whose day this fragment belongs to. Defaults to the configured user.")]
    pub username: Option<String>,

    #[schemars(description = "Calendar day of the fragment, YYYY-MM-DD")]
    pub day: String,

    #[schemars(
        description = "Transcript text. Time markers such as [2026-03-01T09:30:00], [09:30] or [09:30|09:45] each start a new fragment; unmarked text is one fragment."
    )]
    pub text: String,

    #[schemars(
        description = "Local time the text describes (RFC 3339 or HH:MM). Applies to fragments without a marker; defaults to now. Also part of the derived chunk id, so supply it when the same words recur later in the day."
    )]
    pub observed_at: Option<String>,

    #[schemars(
        description = "Idempotency key. Re-sending the same id is a no-op. When omitted it is derived from user, day, text and the fragment's time (marker or observed_at). Without either time, identical text on the same day counts as a duplicate. For text split into several fragments the n-th fragment uses <chunk_id>-<n>."
    )]
    pub chunk_id: Option<String>,
}
