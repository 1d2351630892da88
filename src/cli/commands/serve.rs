//! `serve` command
//!
//! Wires the mapping, output adapter, engine, dispatcher and HTTP server
//! together and runs until shutdown is requested.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::args::ServeArgs;
use crate::config::load_mapping;
use crate::dispatcher::{DispatchOptions, Dispatcher};
use crate::engine::ChannelEngine;
use crate::error::SequencerError;
use crate::observability::init_metrics;
use crate::output::select_output;
use crate::registry::ConnectionRegistry;
use crate::server::{AppState, HttpServer, ServerConfig, bind_address};

/// Start the trigger server.
///
/// Output pins are always driven idle and released before this returns,
/// including when serving fails.
///
/// # Errors
///
/// Returns an output error if the adapter cannot be selected or a pin
/// cannot be initialised, and a transport error if the listener cannot be
/// bound or the server fails.
pub async fn run(args: &ServeArgs, cancel: CancellationToken) -> Result<(), SequencerError> {
    let bind_addr = bind_address(&args.host, args.port)?;

    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    let loaded = load_mapping(args.config.as_deref());
    for warning in &loaded.warnings {
        warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
    info!(
        source = %loaded.source,
        channels = loaded.mapping.len(),
        "channel mapping loaded"
    );

    let output = select_output(args.output, &args.gpio_root)?;
    let engine = ChannelEngine::new(loaded.mapping, output)?;

    if args.self_test {
        engine.self_test().await;
    }

    let dispatcher = Dispatcher::new(
        engine.clone(),
        DispatchOptions {
            deferred_stop: args.deferred_stop,
        },
    );
    if args.deferred_stop {
        warn!("deferred stop enabled: retriggered pulses may be cut short");
    }
    let state = AppState::new(dispatcher, ConnectionRegistry::new(), cancel);
    let config = ServerConfig {
        bind_addr,
        web_dir: Some(args.web_dir.clone()),
    };

    let served = match HttpServer::bind(&config, state).await {
        Ok(server) => server.run().await,
        Err(e) => Err(e),
    };
    let released = engine.shutdown().await;

    served?;
    released?;
    info!("server stopped");
    Ok(())
}
