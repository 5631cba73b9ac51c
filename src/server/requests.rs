//! MCP tool request types.

use rmcp::schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FindUserRequest {
    #[schemars(description = "The query to search for")]
    pub query: String,
}
