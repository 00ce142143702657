use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DailyReflectionParams {
    #[schemars(description = "Whose day to reflect on. Defaults to the configured user.")]
    pub username: Option<String>,

    #[schemars(description = "Calendar day, YYYY-MM-DD")]
    pub day: String,
}
