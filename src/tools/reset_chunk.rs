//! MCP `reset_chunk` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `reset_chunk` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ResetChunkParams {
    /// Only failed chunks can be reset.
    #[schemars(description = "ID of a failed chunk to put back in the queue")]
    pub chunk_id: String,
}
