//! HTTP boundary for the session transport.
//!
//! One tower service routes both entry points of the streaming protocol:
//! `GET {endpoint}` opens a session and its long-lived event stream, and
//! `POST {endpoint}?sessionId=…` delivers one client message to an
//! already-open session. Request-shaped failures (missing or unknown
//! session ID, malformed body) are resolved here, before the tool-calling
//! runtime is involved.

use crate::error::TransportError;
use crate::session::SessionRegistry;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::http::header::CONTENT_TYPE;
use hyper::http::{Method, Request, Response, StatusCode};
use rmcp::ServerHandler;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_service::Service;
use tracing::debug;

/// Configuration for [`McpSseService`].
#[derive(Clone, Debug)]
pub struct SseServiceConfig {
    /// Keep-alive comment interval for open streams (`None` disables).
    pub sse_keep_alive: Option<Duration>,
}

impl Default for SseServiceConfig {
    fn default() -> Self {
        Self {
            sse_keep_alive: Some(Duration::from_secs(15)),
        }
    }
}

/// Tower service adapting the request/response cycle to the session
/// transport.
pub struct McpSseService<S> {
    registry: Arc<SessionRegistry<S>>,
    config: SseServiceConfig,
}

impl<S> McpSseService<S>
where
    S: ServerHandler,
{
    pub fn new(registry: Arc<SessionRegistry<S>>, config: SseServiceConfig) -> Self {
        Self { registry, config }
    }

    async fn dispatch<B>(
        registry: Arc<SessionRegistry<S>>,
        config: SseServiceConfig,
        req: Request<B>,
    ) -> Response<BoxBody<Bytes, Infallible>>
    where
        B: http_body::Body + Send,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        if req.uri().path() != registry.endpoint() {
            return text_response(StatusCode::NOT_FOUND, "Not Found");
        }
        let session_id = query_param(req.uri().query(), "sessionId");
        let method = req.method().clone();

        match method {
            Method::GET => match registry.connect(session_id.as_deref()).await {
                Ok(handle) => match handle.handle_sse_request(config.sse_keep_alive) {
                    Ok(response) => response,
                    Err(err) => {
                        handle.close();
                        error_response(&err)
                    }
                },
                Err(err) => error_response(&err),
            },
            Method::POST => {
                // Malformed requests are rejected before any registry lookup.
                let Some(session_id) = session_id else {
                    return error_response(&TransportError::MissingSessionId);
                };
                let Some(handle) = registry.get(&session_id).await else {
                    return error_response(&TransportError::UnknownSession(session_id));
                };
                let body = match req.into_body().collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(err) => {
                        return error_response(&TransportError::InvalidMessage(err.to_string()))
                    }
                };
                match handle.handle_post_message(body).await {
                    Ok(()) => text_response(StatusCode::ACCEPTED, "Accepted"),
                    Err(err) => error_response(&err),
                }
            }
            _ => text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
        }
    }
}

impl<S> Clone for McpSseService<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
        }
    }
}

impl<S, B> Service<Request<B>> for McpSseService<S>
where
    S: ServerHandler,
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        Box::pin(async move { Ok(Self::dispatch(registry, config, req).await) })
    }
}

/// First non-empty value for `name` in a query string.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        if parts.next() == Some(name) {
            if let Some(value) = parts.next().filter(|value| !value.is_empty()) {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn text_response(status: StatusCode, body: &str) -> Response<BoxBody<Bytes, Infallible>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.to_owned())).boxed())
        .expect("valid response")
}

fn error_response(err: &TransportError) -> Response<BoxBody<Bytes, Infallible>> {
    debug!(error = %err, status = %err.status(), "request rejected");
    text_response(err.status(), &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryUserDirectory, UserRecord};
    use crate::server::DirectoryServer;
    use crate::storage::{ImageFetcher, StaticTokenObjectStore};
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    fn fixture_users() -> Vec<UserRecord> {
        vec![
            UserRecord {
                name: "Kody Koala".to_string(),
                username: "kody".to_string(),
                image_object_key: None,
            },
            UserRecord {
                name: "Marty McFly".to_string(),
                username: "marty".to_string(),
                image_object_key: None,
            },
        ]
    }

    fn test_service() -> (
        McpSseService<DirectoryServer>,
        Arc<SessionRegistry<DirectoryServer>>,
    ) {
        let directory = Arc::new(InMemoryUserDirectory::new(fixture_users()));
        let store = Arc::new(StaticTokenObjectStore::new("http://127.0.0.1:1", None));
        let images = Arc::new(ImageFetcher::new(store));
        let registry = Arc::new(SessionRegistry::new(
            "/mcp",
            CancellationToken::new(),
            move || DirectoryServer::new(directory.clone(), images.clone()),
        ));
        let service = McpSseService::new(
            Arc::clone(&registry),
            SseServiceConfig {
                sse_keep_alive: None,
            },
        );
        (service, registry)
    }

    fn get_request(path_and_query: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri(path_and_query)
            .body(Full::new(Bytes::new()))
            .expect("valid request")
    }

    fn post_request(path_and_query: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri(path_and_query)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.to_owned())))
            .expect("valid request")
    }

    async fn next_chunk(body: &mut BoxBody<Bytes, Infallible>) -> String {
        let frame = timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("timed out waiting for stream frame")
            .expect("stream ended unexpectedly")
            .expect("stream is infallible");
        let data = frame.into_data().expect("data frame");
        String::from_utf8(data.to_vec()).expect("frame is utf-8")
    }

    fn session_id_from_endpoint(frame: &str) -> String {
        let marker = "sessionId=";
        let start = frame
            .find(marker)
            .expect("endpoint frame carries a session ID")
            + marker.len();
        frame[start..]
            .split_whitespace()
            .next()
            .expect("session ID value")
            .to_string()
    }

    #[test]
    fn query_param_picks_the_named_value() {
        assert_eq!(
            query_param(Some("sessionId=abc&x=1"), "sessionId"),
            Some("abc".to_string())
        );
        assert_eq!(
            query_param(Some("x=1&sessionId=abc"), "sessionId"),
            Some("abc".to_string())
        );
        // Empty values count as absent.
        assert_eq!(query_param(Some("sessionId="), "sessionId"), None);
        assert_eq!(query_param(Some("other=1"), "sessionId"), None);
        assert_eq!(query_param(None, "sessionId"), None);
    }

    #[tokio::test]
    async fn stream_open_assigns_a_session() {
        let (mut service, registry) = test_service();

        let response = service.call(get_request("/mcp")).await.expect("call");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");

        let mut body = response.into_body();
        let endpoint_frame = next_chunk(&mut body).await;
        assert!(endpoint_frame.starts_with("event: endpoint\ndata: /mcp?sessionId="));

        let session_id = session_id_from_endpoint(&endpoint_frame);
        assert!(registry.get(&session_id).await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn post_without_session_id_is_malformed() {
        let (mut service, registry) = test_service();
        let response = service
            .call(post_request("/mcp", "{}"))
            .await
            .expect("call");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        // Rejected before any lookup; the registry is untouched.
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn post_to_unknown_session_is_not_found() {
        let (mut service, registry) = test_service();
        let response = service
            .call(post_request("/mcp?sessionId=UNKNOWN", "{}"))
            .await
            .expect("call");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn post_with_malformed_body_is_rejected() {
        let (mut service, _registry) = test_service();
        let response = service.call(get_request("/mcp?sessionId=s1")).await.expect("call");
        let _body = response.into_body();

        let response = service
            .call(post_request("/mcp?sessionId=s1", "not json"))
            .await
            .expect("call");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_live_session_id_conflicts() {
        let (mut service, _registry) = test_service();
        let response = service.call(get_request("/mcp?sessionId=dup")).await.expect("call");
        assert_eq!(response.status(), StatusCode::OK);
        // Keep the first stream alive while reconnecting.
        let _body = response.into_body();

        let response = service.call(get_request("/mcp?sessionId=dup")).await.expect("call");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_paths_and_methods_are_rejected() {
        let (mut service, _registry) = test_service();

        let response = service.call(get_request("/other")).await.expect("call");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/mcp")
            .body(Full::new(Bytes::new()))
            .expect("valid request");
        let response = service.call(request).await.expect("call");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn client_disconnect_deregisters_the_session() {
        let (mut service, registry) = test_service();
        let response = service.call(get_request("/mcp")).await.expect("call");
        let mut body = response.into_body();
        let _endpoint = next_chunk(&mut body).await;
        assert_eq!(registry.len().await, 1);

        drop(body);
        for _ in 0..100 {
            if registry.len().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session was not deregistered after disconnect");
    }

    /// Full round trip: open a stream, initialize the session over posts,
    /// and watch tool results arrive on the stream.
    #[tokio::test]
    async fn tool_calls_round_trip_over_the_stream() {
        let (mut service, _registry) = test_service();

        let response = service.call(get_request("/mcp")).await.expect("call");
        let mut body = response.into_body();
        let session_id = session_id_from_endpoint(&next_chunk(&mut body).await);
        let post_uri = format!("/mcp?sessionId={session_id}");

        let init = r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test-client","version":"0.0.0"}}}"#;
        let response = service.call(post_request(&post_uri, init)).await.expect("call");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let init_reply = next_chunk(&mut body).await;
        assert!(init_reply.starts_with("event: message\ndata: "));
        assert!(
            init_reply.contains("notes-mcp"),
            "unexpected initialize reply: {init_reply}"
        );

        let initialized = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let response = service
            .call(post_request(&post_uri, initialized))
            .await
            .expect("call");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let call = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"find_user","arguments":{"query":"kody"}}}"#;
        let response = service.call(post_request(&post_uri, call)).await.expect("call");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let tool_reply = next_chunk(&mut body).await;
        assert!(
            tool_reply.contains("Kody Koala (kody)"),
            "unexpected tool reply: {tool_reply}"
        );

        // The stream keeps serving subsequent calls on the same session.
        let call = r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"find_user","arguments":{"query":"zzz-nobody"}}}"#;
        let response = service.call(post_request(&post_uri, call)).await.expect("call");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let tool_reply = next_chunk(&mut body).await;
        assert!(
            tool_reply.contains("No users found"),
            "unexpected tool reply: {tool_reply}"
        );
    }
}
