//! Error types for the notes MCP server.
//!
//! Request-shaped failures ([`TransportError`]) are resolved at the HTTP
//! boundary before the tool-calling runtime is involved. Tool execution
//! errors ([`ToolError`]) are returned with `is_error: true` in
//! CallToolResult and never tear down the session.

use hyper::http::StatusCode;
use rmcp::model::{CallToolResult, Content};
use thiserror::Error;

/// Failures of the session transport boundary.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Missing session ID")]
    MissingSessionId,

    #[error("Invalid message body: {0}")]
    InvalidMessage(String),

    #[error("No session with ID: {0}")]
    UnknownSession(String),

    #[error("Session already has a live transport: {0}")]
    SessionConflict(String),

    #[error("Event stream already opened for session: {0}")]
    StreamAlreadyTaken(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),
}

impl TransportError {
    /// HTTP status for this failure at the request boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingSessionId | Self::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            Self::UnknownSession(_) | Self::SessionClosed(_) => StatusCode::NOT_FOUND,
            Self::SessionConflict(_) | Self::StreamAlreadyTaken(_) => StatusCode::CONFLICT,
        }
    }
}

/// Tool execution errors - returned with is_error: true in CallToolResult.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("User lookup failed: {0}")]
    DirectoryUnavailable(String),

    #[error("Failed to fetch image: {0}")]
    ImageFetch(String),
}

impl ToolError {
    /// Convert to MCP CallToolResult with is_error: true
    pub fn to_tool_result(&self) -> CallToolResult {
        CallToolResult {
            content: vec![Content::text(self.to_string())],
            is_error: Some(true),
            meta: None,
            structured_content: None,
        }
    }
}
