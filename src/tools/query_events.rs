//! MCP `query_events` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `query_events` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryEventsParams {
    #[schemars(description = "Whose day to read. Defaults to the configured user.")]
    pub username: Option<String>,

    #[schemars(description = "Calendar day, YYYY-MM-DD")]
    pub day: String,
}
