//! Prometheus metrics.
//!
//! Counters and gauges for commands, pulses and connections. Recording
//! functions are cheap no-ops until [`init_metrics`] installs a recorder.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::SequencerError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Command types accepted on the WebSocket.
///
/// Anything else is bucketed as `"__unknown__"` so clients cannot grow the
/// label set.
const KNOWN_COMMANDS: [&str; 4] = ["gpio_trigger", "immediate_trigger", "stop_channels", "ping"];

/// Sanitizes a command type for use as a metrics label.
#[must_use]
pub fn sanitize_command_label(command: &str) -> &str {
    if KNOWN_COMMANDS.contains(&command) {
        command
    } else {
        "__unknown__"
    }
}

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `0.0.0.0:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `SequencerError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), SequencerError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([0, 0, 0, 0], p))
                .install()
        },
    )
    .map_err(|e| SequencerError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "gpio_sequencer_commands_total",
        "Total number of client commands received, by type"
    );
    describe_counter!(
        "gpio_sequencer_triggers_total",
        "Channel trigger attempts, by result"
    );
    describe_counter!(
        "gpio_sequencer_releases_total",
        "Pulses ended by their release task"
    );
    describe_counter!(
        "gpio_sequencer_protocol_errors_total",
        "Inbound messages rejected by the decoder"
    );
    describe_gauge!(
        "gpio_sequencer_connections_active",
        "Number of currently open WebSocket connections"
    );
    describe_gauge!(
        "gpio_sequencer_active_channels",
        "Channels currently holding a pending release"
    );
}

/// Records an inbound command.
pub fn record_command(command: &str) {
    let label = sanitize_command_label(command);
    counter!("gpio_sequencer_commands_total", "type" => label.to_owned()).increment(1);
}

/// Records a trigger attempt.
pub fn record_trigger(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("gpio_sequencer_triggers_total", "result" => result).increment(1);
}

/// Records a pulse ended by its release task.
pub fn record_release() {
    counter!("gpio_sequencer_releases_total").increment(1);
}

/// Records a rejected inbound message.
pub fn record_protocol_error() {
    counter!("gpio_sequencer_protocol_errors_total").increment(1);
}

/// Sets the number of open connections.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections_active(count: usize) {
    gauge!("gpio_sequencer_connections_active").set(count as f64);
}

/// Sets the number of channels with a pending release.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_channels(count: usize) {
    gauge!("gpio_sequencer_active_channels").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_commands_pass_through() {
        for command in &KNOWN_COMMANDS {
            assert_eq!(sanitize_command_label(command), *command);
        }
    }

    #[test]
    fn unknown_commands_are_bucketed() {
        assert_eq!(sanitize_command_label("dance"), "__unknown__");
        assert_eq!(sanitize_command_label(""), "__unknown__");
        assert_eq!(sanitize_command_label(&"x".repeat(10_000)), "__unknown__");
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_command("gpio_trigger");
        record_command("evil");
        record_trigger(true);
        record_trigger(false);
        record_release();
        record_protocol_error();
        set_connections_active(2);
        set_active_channels(3);
    }
}
