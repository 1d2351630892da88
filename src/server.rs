//! HTTP surface.
//!
//! One axum router carries the `/ws` WebSocket endpoint that runs the
//! command loop, a `/health` status endpoint, and, when a built UI is
//! present, the static files of that UI.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use crate::config::{ChannelId, ChannelMapping};
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::engine::ChannelEngine;
use crate::error::TransportError;
use crate::protocol::ServerEvent;
use crate::registry::ConnectionRegistry;

/// Capacity of each connection's outbound queue.
const OUTBOUND_QUEUE: usize = 64;

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, `host:port`.
    pub bind_addr: String,
    /// Directory holding the built UI, served when it exists.
    pub web_dir: Option<PathBuf>,
}

/// State shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    dispatcher: Dispatcher,
    registry: ConnectionRegistry,
    cancel: CancellationToken,
}

impl AppState {
    /// Bundles the shared collaborators.
    #[must_use]
    pub const fn new(
        dispatcher: Dispatcher,
        registry: ConnectionRegistry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            cancel,
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// A bound, not yet running, HTTP server.
#[derive(Debug)]
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Binds the listener and builds the router.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the address cannot be bound.
    pub async fn bind(config: &ServerConfig, state: AppState) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let cancel = state.cancel.clone();
        let router = build_router(state, config.web_dir.as_deref());
        Ok(Self {
            listener,
            router,
            local_addr,
            cancel,
        })
    }

    /// Address actually bound (useful when binding port 0).
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serve`] if the accept loop fails.
    pub async fn run(self) -> Result<(), TransportError> {
        info!(addr = %self.local_addr, "HTTP server listening");
        let cancel = self.cancel;
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await?;
        debug!("HTTP server shut down");
        Ok(())
    }
}

/// Formats a `host:port` bind address, bracketing bare IPv6 hosts.
///
/// # Errors
///
/// Returns [`TransportError::InvalidAddress`] for an empty host or one
/// containing whitespace.
pub fn bind_address(host: &str, port: u16) -> Result<String, TransportError> {
    let host = host.trim();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(TransportError::InvalidAddress(host.to_string()));
    }
    if host.contains(':') && !host.starts_with('[') {
        Ok(format!("[{host}]:{port}"))
    } else {
        Ok(format!("{host}:{port}"))
    }
}

// ============================================================================
// Axum Router
// ============================================================================

/// Builds the application router.
///
/// Static UI routes are added only when `web_dir` exists: `/assets` maps to
/// `<web_dir>/assets` and every other unmatched path falls back to
/// `<web_dir>`, with `index.html` served for directories.
pub fn build_router(state: AppState, web_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler));

    match web_dir {
        Some(dir) if dir.is_dir() => {
            info!(dir = %dir.display(), "serving static UI");
            router = router
                .nest_service("/assets", ServeDir::new(dir.join("assets")))
                .fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
        }
        Some(dir) => {
            warn!(dir = %dir.display(), "UI directory not found, static files will not be served");
        }
        None => {}
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Always `"healthy"` while the server answers.
    pub status: &'static str,
    /// Whether hardware output is in use.
    pub gpio_available: bool,
    /// Number of mapped channels.
    pub channel_count: usize,
    /// Mapped channels, ascending.
    pub channels: Vec<ChannelId>,
    /// Channel to pin mapping.
    pub channel_mapping: ChannelMapping,
    /// Channels mid-pulse.
    pub active_channels: Vec<ChannelId>,
    /// Channels whose last write failed.
    pub faulted_channels: Vec<ChannelId>,
    /// Crate version.
    pub version: &'static str,
}

impl HealthReport {
    /// Snapshots the engine.
    #[must_use]
    pub fn collect(engine: &ChannelEngine) -> Self {
        let mapping = engine.mapping();
        Self {
            status: "healthy",
            gpio_available: engine.is_available(),
            channel_count: mapping.len(),
            channels: mapping.channels(),
            channel_mapping: mapping.clone(),
            active_channels: engine.active_channels(),
            faulted_channels: engine.faulted_channels(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport::collect(state.dispatcher.engine()))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs one client session.
///
/// Outbound events go through a bounded queue drained by a writer task, so
/// replies and broadcasts share one ordered path to the socket. Inbound
/// frames are handled strictly one at a time.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE);
    let guard = state.registry.register(tx.clone());
    let connection_id = guard.id();
    info!(%connection_id, "WebSocket connection established");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!(kind = event.kind(), error = %e, "failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if tx.send(state.dispatcher.connection_status()).await.is_ok() {
        loop {
            let frame = tokio::select! {
                () = state.cancel.cancelled() => {
                    debug!(%connection_id, "closing connection for shutdown");
                    break;
                }
                frame = stream.next() => frame,
            };

            let dispatch = match frame {
                Some(Ok(Message::Text(text))) => state.dispatcher.handle_text(text.as_str()),
                Some(Ok(Message::Binary(_))) => Dispatch {
                    reply: Some(ServerEvent::error("binary frames are not supported")),
                    close: false,
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!(%connection_id, "WebSocket client disconnected");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(%connection_id, error = %e, "WebSocket receive error");
                    break;
                }
            };

            if let Some(reply) = dispatch.reply
                && tx.send(reply).await.is_err()
            {
                break;
            }
            if dispatch.close {
                break;
            }
        }
    }

    // writer drains queued replies, then exits once every sender is gone
    drop(guard);
    drop(tx);
    if let Err(e) = writer.await {
        error!(%connection_id, error = %e, "writer task failed");
    }
    info!(%connection_id, "WebSocket connection closed");
}

// ============================================================================
// Tests
// ============================================================================
