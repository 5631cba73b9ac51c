//! The two halves of a session's streaming transport.
//!
//! [`TransportHandle`] faces the HTTP boundary: it produces the long-lived
//! `text/event-stream` response and accepts posted client messages.
//! [`SessionTransport`] faces the tool-calling runtime: it implements
//! [`rmcp::transport::Transport`] so the runtime can be bound to the
//! session with `serve_with_ct`.

use crate::error::TransportError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::Either;
use futures::{future, stream, StreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use hyper::http::{Response, StatusCode};
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use rmcp::service::RoleServer;
use rmcp::transport::Transport;
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Bounded queue depth between the HTTP boundary and the session runtime.
const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Build the two halves of a session transport.
///
/// The handle goes into the registry; the transport is handed to the
/// runtime. Both observe the same close signal.
pub(crate) fn session_channel(
    session_id: String,
    endpoint: String,
    close_signal: CancellationToken,
) -> (TransportHandle, SessionTransport) {
    let (inbound_tx, inbound_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

    let handle = TransportHandle {
        inner: Arc::new(HandleInner {
            session_id: session_id.clone(),
            endpoint,
            created_at: Utc::now(),
            inbound: inbound_tx,
            outbound: Mutex::new(Some(outbound_rx)),
            close_signal: close_signal.clone(),
        }),
    };
    let transport = SessionTransport {
        session_id,
        inbound: inbound_rx,
        outbound: outbound_tx,
        close_signal,
    };
    (handle, transport)
}

#[derive(Debug)]
pub(crate) struct HandleInner {
    session_id: String,
    /// Request path advertised to the client in the `endpoint` event.
    endpoint: String,
    created_at: DateTime<Utc>,
    inbound: mpsc::Sender<ClientJsonRpcMessage>,
    /// Taken exactly once, by the stream-open request.
    outbound: Mutex<Option<mpsc::Receiver<ServerJsonRpcMessage>>>,
    close_signal: CancellationToken,
}

/// Registry-facing half of a session transport.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    pub(crate) inner: Arc<HandleInner>,
}

impl TransportHandle {
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn is_closed(&self) -> bool {
        self.inner.close_signal.is_cancelled()
    }

    /// Fire the close signal. Idempotent; a second call is a no-op.
    pub fn close(&self) {
        self.inner.close_signal.cancel();
    }

    /// Wait until the close signal fires.
    pub(crate) async fn closed(&self) {
        self.inner.close_signal.cancelled().await;
    }

    /// Deliver one posted client message to the runtime.
    ///
    /// Messages are queued in the order posts are accepted; delivery never
    /// waits on the open event stream.
    pub async fn handle_post_message(&self, body: Bytes) -> Result<(), TransportError> {
        let message: ClientJsonRpcMessage = serde_json::from_slice(&body)
            .map_err(|err| TransportError::InvalidMessage(err.to_string()))?;
        if self.is_closed() {
            return Err(TransportError::SessionClosed(
                self.inner.session_id.clone(),
            ));
        }
        debug!(session_id = %self.inner.session_id, "accepted client message");
        self.inner
            .inbound
            .send(message)
            .await
            .map_err(|_| TransportError::SessionClosed(self.inner.session_id.clone()))
    }

    /// Open the long-lived event stream for this session.
    ///
    /// The first frame is the `endpoint` event carrying the post URL with
    /// this session's ID; every runtime message follows as a `message`
    /// event. The stream stays open until the close signal fires, and
    /// dropping the response body (client disconnect) fires it.
    pub fn handle_sse_request(
        &self,
        keep_alive: Option<Duration>,
    ) -> Result<Response<BoxBody<Bytes, Infallible>>, TransportError> {
        let outbound = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| TransportError::StreamAlreadyTaken(self.inner.session_id.clone()))?;

        let endpoint_frame = Bytes::from(format!(
            "event: endpoint\ndata: {}?sessionId={}\n\n",
            self.inner.endpoint, self.inner.session_id
        ));
        let messages = ReceiverStream::new(outbound).map(|message| message_frame(&message));

        let tail = match keep_alive {
            Some(period) => {
                let start = tokio::time::Instant::now() + period;
                let mut interval = tokio::time::interval_at(start, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let pings = IntervalStream::new(interval)
                    .map(|_| Bytes::from_static(b": keep-alive\n\n"));
                Either::Left(stream::select(messages, pings))
            }
            None => Either::Right(messages),
        };

        let close_signal = self.inner.close_signal.clone();
        let guard = self.inner.close_signal.clone().drop_guard();
        let frames = stream::once(future::ready(endpoint_frame))
            .chain(tail)
            .take_until(close_signal.cancelled_owned())
            .map(move |chunk| {
                let _ = &guard;
                Ok::<_, Infallible>(Frame::data(chunk))
            });

        let response = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .body(BodyExt::boxed(StreamBody::new(frames)))
            .expect("valid response");
        Ok(response)
    }
}

/// One outbound message as an SSE `message` event.
fn message_frame(message: &ServerJsonRpcMessage) -> Bytes {
    match serde_json::to_string(message) {
        Ok(json) => Bytes::from(format!("event: message\ndata: {json}\n\n")),
        Err(err) => {
            error!(error = %err, "failed to serialize outbound message");
            Bytes::from_static(b": serialization error\n\n")
        }
    }
}

/// Runtime-facing half of a session transport.
pub struct SessionTransport {
    session_id: String,
    inbound: mpsc::Receiver<ClientJsonRpcMessage>,
    outbound: mpsc::Sender<ServerJsonRpcMessage>,
    close_signal: CancellationToken,
}

impl Transport<RoleServer> for SessionTransport {
    type Error = TransportError;

    fn send(
        &mut self,
        item: ServerJsonRpcMessage,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        let outbound = self.outbound.clone();
        let session_id = self.session_id.clone();
        async move {
            outbound
                .send(item)
                .await
                .map_err(|_| TransportError::SessionClosed(session_id))
        }
    }

    fn receive(&mut self) -> impl Future<Output = Option<ClientJsonRpcMessage>> + Send {
        async {
            tokio::select! {
                message = self.inbound.recv() => message,
                _ = self.close_signal.cancelled() => None,
            }
        }
    }

    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.close_signal.cancel();
        future::ready(Ok(()))
    }
}
