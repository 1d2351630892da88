//! Shared integration-test harness: an in-process server over the in-memory
//! output adapter, a WebSocket client, and a helper for running the binary.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use gpio_sequencer::config::ChannelMapping;
use gpio_sequencer::dispatcher::{DispatchOptions, Dispatcher};
use gpio_sequencer::engine::ChannelEngine;
use gpio_sequencer::error::TransportError;
use gpio_sequencer::output::MemoryOutput;
use gpio_sequencer::registry::ConnectionRegistry;
use gpio_sequencer::server::{AppState, HttpServer, ServerConfig};

/// Default timeout for a single message from the server.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub engine: ChannelEngine,
    pub output: Arc<MemoryOutput>,
    pub registry: ConnectionRegistry,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), TransportError>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(DispatchOptions::default()).await
    }

    pub async fn start_with(options: DispatchOptions) -> Self {
        let output = Arc::new(MemoryOutput::new());
        let engine = ChannelEngine::new(ChannelMapping::default(), output.clone())
            .expect("engine init");
        let registry = ConnectionRegistry::new();
        let cancel = CancellationToken::new();
        let state = AppState::new(
            Dispatcher::new(engine.clone(), options),
            registry.clone(),
            cancel.clone(),
        );
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            web_dir: None,
        };
        let server = HttpServer::bind(&config, state).await.expect("bind");
        let addr = server.local_addr();
        let handle = tokio::spawn(server.run());

        Self {
            addr,
            engine,
            output,
            registry,
            cancel,
            handle,
        }
    }

    /// Opens a WebSocket and consumes the `connection_status` greeting.
    pub async fn connect(&self) -> WsClient {
        let mut client = self.connect_raw().await;
        let status = client.recv().await;
        assert_eq!(status["type"], "connection_status", "unexpected greeting: {status}");
        client
    }

    /// Opens a WebSocket without reading anything.
    pub async fn connect_raw(&self) -> WsClient {
        let url = format!("ws://{}/ws", self.addr);
        let (stream, _) = connect_async(url).await.expect("WebSocket connect");
        WsClient { stream }
    }

    /// Cancels the server, waits for it, and shuts the engine down.
    pub async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(DEFAULT_TIMEOUT, self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server failed");
        self.engine.shutdown().await.expect("engine shutdown");
    }

    /// Cancels the server without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Test-side WebSocket client.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, message: &Value) {
        self.send_raw(&message.to_string()).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(Message::text(text.to_owned()))
            .await
            .expect("send");
    }

    /// Next text frame as JSON, skipping control frames.
    pub async fn recv(&mut self) -> Value {
        tokio::time::timeout(DEFAULT_TIMEOUT, async {
            loop {
                let frame = self
                    .stream
                    .next()
                    .await
                    .expect("connection closed")
                    .expect("receive error");
                if let Message::Text(text) = frame {
                    return serde_json::from_str::<Value>(text.as_str()).expect("invalid JSON");
                }
            }
        })
        .await
        .expect("timed out waiting for message")
    }

    /// Sends `message` and returns the next reply.
    pub async fn request(&mut self, message: &Value) -> Value {
        self.send(message).await;
        self.recv().await
    }

    /// Waits for the server to close the connection.
    pub async fn expect_closed(&mut self) {
        tokio::time::timeout(DEFAULT_TIMEOUT, async {
            loop {
                match self.stream.next().await {
                    None | Some(Ok(Message::Close(_)) | Err(_)) => return,
                    Some(Ok(Message::Text(text))) => {
                        panic!("expected close, got {text}");
                    }
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .expect("connection was not closed");
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Polls `condition` until it holds or `DEFAULT_TIMEOUT` passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Runs the binary with `args` and collects its output.
pub fn run_cli(args: &[&str]) -> Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_gpio-sequencer"))
        .args(args)
        .env_remove("GPIO_SEQUENCER_LOG")
        .output()
        .expect("failed to run gpio-sequencer")
}

/// Writes `contents` to `name` inside `dir`.
pub fn write_fixture(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}
