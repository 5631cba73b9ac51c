//! Session-keyed streaming transport.
//!
//! A session is one logical client connection: a single long-lived
//! server-to-client event stream plus any number of short-lived client
//! posts, correlated by session ID. Each session bridges the HTTP boundary
//! to a dedicated tool-calling runtime through a pair of bounded channels.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      notes-mcp process                     │
//! │                                                            │
//! │  GET  /mcp ──────────▶ SessionRegistry::connect            │
//! │                        ├─ sessions: HashMap<id, handle>    │
//! │                        └─ spawns one runtime per session   │
//! │                                                            │
//! │  POST /mcp?sessionId=x ▶ registry lookup ─▶ handle ──┐     │
//! │                                                      ▼     │
//! │   SSE response ◀── TransportHandle ◀══▶ SessionTransport   │
//! │   (event stream)      (channels)        (MCP runtime)      │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Closing is a signal, not a callback: every shutdown path (client
//! disconnect, runtime exit, explicit close, server shutdown) cancels the
//! session's `CancellationToken`, and the registry deregisters the entry
//! exactly once.

mod registry;
mod transport;

pub use registry::SessionRegistry;
pub use transport::{SessionTransport, TransportHandle};
