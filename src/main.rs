//! User directory MCP server.
//!
//! Serves the MCP streaming protocol over HTTP: a long-lived SSE stream
//! per session plus short-lived message posts, both under one endpoint
//! path and correlated by session ID.

use bytes::Bytes;
use clap::Parser;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::http::{header::ORIGIN, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use notes_mcp::{
    DirectoryServer, ImageFetcher, InMemoryUserDirectory, McpSseService, SessionRegistry,
    SseServiceConfig, StaticTokenObjectStore, UserDirectory,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_service::Service;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "notes-mcp", version, about = "User directory MCP server over SSE")]
struct Cli {
    /// Bind address (e.g., 127.0.0.1:8765)
    #[arg(long, default_value = "127.0.0.1:8765")]
    bind: String,
    /// Endpoint path for both the event stream and message posts
    #[arg(long, default_value = "/mcp")]
    endpoint: String,
    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = 15)]
    sse_keep_alive_secs: u64,
    /// Allowed Origin values (comma-separated). Defaults to localhost only.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "http://localhost,http://127.0.0.1"
    )]
    allow_origin: Vec<String>,
    /// JSON file with the user records to serve
    #[arg(long)]
    users_file: Option<PathBuf>,
    /// Base URL of the object store holding profile images
    #[arg(long, env = "OBJECT_STORE_URL", default_value = "http://127.0.0.1:9000/objects")]
    object_store_url: String,
    /// Bearer token for object store requests
    #[arg(long, env = "OBJECT_STORE_TOKEN")]
    object_store_token: Option<String>,
}

#[derive(Clone)]
struct OriginCheckService<S> {
    inner: S,
    allowed_origins: Arc<std::collections::HashSet<String>>,
}

impl<S> OriginCheckService<S> {
    fn new(inner: S, allowed_origins: Arc<std::collections::HashSet<String>>) -> Self {
        Self {
            inner,
            allowed_origins,
        }
    }
}

impl<B, S> Service<Request<B>> for OriginCheckService<S>
where
    B: http_body::Body + Send + 'static,
    B::Error: std::fmt::Display,
    S: Service<
            Request<B>,
            Response = Response<BoxBody<Bytes, std::convert::Infallible>>,
            Error = std::convert::Infallible,
        > + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, std::convert::Infallible>>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let allowed_origins = self.allowed_origins.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if let Some(origin) = req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()) {
                if !allowed_origins.contains(origin) {
                    warn!(origin = %origin, "rejected request from disallowed origin");
                    let resp = Response::builder()
                        .status(StatusCode::FORBIDDEN)
                        .body(Full::new(Bytes::from("Forbidden")).boxed())
                        .expect("valid response");
                    return Ok(resp);
                }
            }
            inner.call(req).await
        })
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notes_mcp=info")),
        )
        .init();

    let cli = Cli::parse();
    run_server(cli).await
}

async fn run_server(cli: Cli) -> anyhow::Result<()> {
    info!("Starting notes MCP server");

    let bind_addr: SocketAddr = cli
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;
    if !cli.endpoint.starts_with('/') {
        return Err(anyhow::anyhow!("endpoint must start with '/'"));
    }

    let directory: Arc<dyn UserDirectory> = match cli.users_file.as_deref() {
        Some(path) => {
            let directory = InMemoryUserDirectory::from_json_file(path)
                .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?;
            info!(users = directory.len(), path = %path.display(), "loaded user directory");
            Arc::new(directory)
        }
        None => {
            warn!("no --users-file given; the directory is empty");
            Arc::new(InMemoryUserDirectory::default())
        }
    };
    let store = Arc::new(StaticTokenObjectStore::new(
        cli.object_store_url,
        cli.object_store_token,
    ));
    let images = Arc::new(ImageFetcher::new(store));

    let cancel = CancellationToken::new();
    let registry = Arc::new(SessionRegistry::new(
        cli.endpoint,
        cancel.child_token(),
        move || DirectoryServer::new(directory.clone(), images.clone()),
    ));
    let config = SseServiceConfig {
        sse_keep_alive: if cli.sse_keep_alive_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(cli.sse_keep_alive_secs))
        },
    };
    let service = McpSseService::new(registry.clone(), config);

    let allowed_origins: std::collections::HashSet<String> = cli
        .allow_origin
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let service = OriginCheckService::new(service, Arc::new(allowed_origins));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed: {e}"))?;
    info!("MCP server listening on http://{bind_addr}{}", registry.endpoint());

    let registry_for_shutdown = registry.clone();
    let cancel_for_shutdown = cancel.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            registry_for_shutdown.shutdown().await;
            cancel_for_shutdown.cancel();
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("HTTP server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, _) = res.map_err(|e| anyhow::anyhow!("accept failed: {e}"))?;
                let svc = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        TowerToHyperService::new(svc),
                    );
                    if let Err(err) = conn.await {
                        tracing::error!("http connection error: {err}");
                    }
                });
            }
        }
    }

    info!("Server stopped");
    Ok(())
}
