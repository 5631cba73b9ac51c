//! User directory MCP server over a session-keyed SSE transport.
//!
//! This library bridges a stateless HTTP request/response cycle to the
//! stateful, session-keyed streaming protocol used by MCP tool-calling
//! clients. A client opens one long-lived event stream (`GET`), receives
//! its session ID in the first `endpoint` event, and then delivers every
//! protocol message as an independent short-lived `POST` correlated by
//! that ID; tool results travel back asynchronously over the open stream.
//!
//! # Architecture
//!
//! - **[`session::SessionRegistry`]**: owns the mapping from session ID to
//!   live transport. Creates transports on stream-open, looks them up for
//!   posts, and retires them exactly once when the session's close signal
//!   fires.
//!
//! - **[`session::TransportHandle`] / [`session::SessionTransport`]**: the
//!   two halves of one session. The handle serves the HTTP boundary; the
//!   transport implements `rmcp::transport::Transport` so the tool-calling
//!   runtime binds to the session with `serve_with_ct`.
//!
//! - **[`service::McpSseService`]**: the tower service routing both entry
//!   points and resolving request-shaped failures (missing or unknown
//!   session) before the runtime is involved.
//!
//! - **[`server::DirectoryServer`]**: the MCP handler. Its `find_user`
//!   tool searches the [`directory::UserDirectory`] collaborator and
//!   attaches profile images fetched through the [`storage::ObjectStore`]
//!   seam as base64 image content.

pub mod directory;
pub mod error;
pub mod server;
pub mod service;
pub mod session;
pub mod storage;

pub use directory::{InMemoryUserDirectory, UserDirectory, UserRecord};
pub use error::{ToolError, TransportError};
pub use server::DirectoryServer;
pub use service::{McpSseService, SseServiceConfig};
pub use session::{SessionRegistry, SessionTransport, TransportHandle};
pub use storage::{ImageFetcher, ObjectStore, SignedGetRequest, StaticTokenObjectStore};
