//! Registry of live session transports.

use crate::error::TransportError;
use crate::session::transport::{session_channel, TransportHandle};
use chrono::Utc;
use rmcp::{ServerHandler, ServiceExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Creates, registers, locates, and retires session transports.
///
/// One instance lives for the lifetime of the server and is shared by every
/// in-flight request. The registry holds the only mapping from session ID
/// to live transport; an entry exists exactly as long as the session is
/// open.
pub struct SessionRegistry<S> {
    /// Request path advertised to clients in the `endpoint` event.
    endpoint: String,
    /// Live transports keyed by session ID.
    sessions: Arc<RwLock<HashMap<String, TransportHandle>>>,
    /// Produces a fresh handler for each session runtime.
    handler_factory: Box<dyn Fn() -> S + Send + Sync>,
    /// Parent close signal; cancelling it closes every open session.
    shutdown: CancellationToken,
}

impl<S> SessionRegistry<S>
where
    S: ServerHandler,
{
    pub fn new<F>(endpoint: impl Into<String>, shutdown: CancellationToken, handler_factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            endpoint: endpoint.into(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            handler_factory: Box::new(handler_factory),
            shutdown,
        }
    }

    /// Request path both transport entry points are served under.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Open a session and bind a fresh runtime to its transport.
    ///
    /// A missing ID gets a newly generated one; a supplied ID that is
    /// already live is rejected. After this returns, [`get`](Self::get)
    /// yields the same transport until the session closes.
    pub async fn connect(&self, session_id: Option<&str>) -> Result<TransportHandle, TransportError> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let close_signal = self.shutdown.child_token();
        let (handle, transport) =
            session_channel(session_id.clone(), self.endpoint.clone(), close_signal.clone());

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&session_id) {
                return Err(TransportError::SessionConflict(session_id));
            }
            sessions.insert(session_id.clone(), handle.clone());
        }
        info!(session_id = %session_id, "session opened");

        // Deregistration watcher: every close path cancels the same signal,
        // and removal is idempotent, so the entry is retired exactly once.
        let sessions = Arc::clone(&self.sessions);
        let watched = handle.clone();
        tokio::spawn(async move {
            watched.closed().await;
            if sessions.write().await.remove(watched.session_id()).is_some() {
                let lifetime = Utc::now().signed_duration_since(watched.created_at());
                info!(
                    session_id = %watched.session_id(),
                    lifetime_ms = lifetime.num_milliseconds(),
                    "session closed"
                );
            }
        });

        // One runtime per session, bound to the transport for its lifetime.
        let handler = (self.handler_factory)();
        let serve_ct = close_signal.child_token();
        tokio::spawn(async move {
            match handler.serve_with_ct(transport, serve_ct).await {
                Ok(running) => {
                    if let Ok(reason) = running.waiting().await {
                        debug!(session_id = %session_id, reason = ?reason, "session runtime stopped");
                    }
                }
                Err(err) => {
                    debug!(session_id = %session_id, error = %err, "session runtime ended during initialization");
                }
            }
            close_signal.cancel();
        });

        Ok(handle)
    }

    /// Look up the live transport for a session. Pure lookup, no mutation.
    pub async fn get(&self, session_id: &str) -> Option<TransportHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Number of open sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Close one session. Returns `false` if no such session was open.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let handle = self.sessions.write().await.remove(session_id);
        match handle {
            Some(handle) => {
                handle.close();
                info!(session_id = %session_id, "session closed");
                true
            }
            None => false,
        }
    }

    /// Close every open session. Called on server shutdown.
    pub async fn shutdown(&self) {
        let open = self.len().await;
        if open > 0 {
            info!(open_sessions = open, "closing all sessions");
        }
        self.shutdown.cancel();
    }
}
