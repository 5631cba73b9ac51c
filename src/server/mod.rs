//! MCP server implementation with user directory tools.

mod requests;

pub use requests::*;

use crate::directory::UserDirectory;
use crate::storage::ImageFetcher;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo,
};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use std::sync::Arc;
use tracing::{debug, instrument};

/// MIME type of stored profile images.
const PROFILE_IMAGE_MIME: &str = "image/png";

/// MCP server exposing user directory search.
#[derive(Clone)]
pub struct DirectoryServer {
    directory: Arc<dyn UserDirectory>,
    images: Arc<ImageFetcher>,
    tool_router: ToolRouter<DirectoryServer>,
}

#[tool_router]
impl DirectoryServer {
    pub fn new(directory: Arc<dyn UserDirectory>, images: Arc<ImageFetcher>) -> Self {
        Self {
            directory,
            images,
            tool_router: Self::tool_router(),
        }
    }

    fn instructions(&self) -> String {
        "User directory for the notes database. \
         Use find_user to search for people by name or username; each match \
         is returned as '<name> (<username>)' with the stored profile image \
         attached when one exists."
            .to_string()
    }

    #[tool(description = "Search for users in the notes database by their name or username")]
    #[instrument(skip(self), fields(query = %req.query))]
    async fn find_user(
        &self,
        Parameters(req): Parameters<FindUserRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: find_user");
        let users = match self.directory.search_users(&req.query).await {
            Ok(users) => users,
            Err(e) => return Ok(e.to_tool_result()),
        };

        let mut content = Vec::new();
        for user in &users {
            content.push(Content::text(format!("{} ({})", user.name, user.username)));

            if let Some(object_key) = &user.image_object_key {
                match self.images.fetch_base64(object_key).await {
                    Ok(data) => content.push(Content::image(data, PROFILE_IMAGE_MIME)),
                    Err(e) => return Ok(e.to_tool_result()),
                }
            }
        }

        if content.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(
                "No users found",
            )]));
        }
        Ok(CallToolResult::success(content))
    }
}

#[tool_handler]
impl ServerHandler for DirectoryServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "notes-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }
}
