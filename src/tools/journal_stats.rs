//! MCP `journal_stats` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `journal_stats` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct JournalStatsParams {
    /// Optional username to restrict statistics to.
    #[schemars(description = "Optional user to filter stats by")]
    pub username: Option<String>,
}
