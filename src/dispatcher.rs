//! Command dispatcher.
//!
//! Turns decoded client commands into engine calls and builds the reply
//! for each. Holds no channel state of its own; every connection shares one
//! dispatcher, and through it one engine.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::ChannelId;
use crate::engine::ChannelEngine;
use crate::error::ProtocolError;
use crate::observability::metrics;
use crate::protocol::{Command, ServerEvent, StoppedChannels, pulse_duration};

/// Dispatcher behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// After each trigger command with a positive duration, also stop the
    /// triggered channels once that duration has elapsed, independently of
    /// the engine's own release. Off by default: the deferred stop also
    /// cuts short any pulse retriggered in the meantime.
    pub deferred_stop: bool,
}

/// Outcome of handling one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Event to send back, if any.
    pub reply: Option<ServerEvent>,
    /// Whether the connection's receive loop must end after the reply.
    pub close: bool,
}

/// Routes commands to the engine.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    engine: ChannelEngine,
    options: DispatchOptions,
}

impl Dispatcher {
    /// Creates a dispatcher over `engine`.
    #[must_use]
    pub const fn new(engine: ChannelEngine, options: DispatchOptions) -> Self {
        Self { engine, options }
    }

    /// The engine commands are routed to.
    #[must_use]
    pub const fn engine(&self) -> &ChannelEngine {
        &self.engine
    }

    /// Greeting sent when a connection opens.
    #[must_use]
    pub fn connection_status(&self) -> ServerEvent {
        ServerEvent::connection_status(self.engine.is_available(), self.engine.mapping().clone())
    }

    /// Decodes and executes one text frame.
    ///
    /// A frame that is not JSON yields an error reply and closes the loop;
    /// any other decoding problem yields an error reply and keeps it open.
    pub fn handle_text(&self, text: &str) -> Dispatch {
        match Command::decode(text) {
            Ok(command) => {
                metrics::record_command(command.kind());
                Dispatch {
                    reply: self.execute(command),
                    close: false,
                }
            }
            Err(e) => {
                metrics::record_protocol_error();
                if let ProtocolError::UnknownType(kind) = &e {
                    metrics::record_command(kind);
                }
                let close = e.is_fatal();
                warn!(error = %e, close, "rejected client message");
                Dispatch {
                    reply: Some(ServerEvent::error(e.to_string())),
                    close,
                }
            }
        }
    }

    /// Executes a decoded command and returns its reply, if it has one.
    pub fn execute(&self, command: Command) -> Option<ServerEvent> {
        match command {
            Command::GpioTrigger {
                channels,
                duration_ms,
            } => {
                if channels.is_empty() {
                    debug!("gpio_trigger with no channels ignored");
                    return None;
                }
                let results = self
                    .engine
                    .trigger_many(&channels, pulse_duration(duration_ms));
                let success = results.values().all(|ok| *ok);
                debug!(?channels, duration_ms, success, "gpio_trigger handled");
                if duration_ms > 0 {
                    self.schedule_deferred_stop(channels.clone(), duration_ms);
                }
                Some(ServerEvent::GpioTriggerResponse {
                    channels,
                    duration: duration_ms,
                    results,
                    success,
                })
            }
            Command::ImmediateTrigger {
                channel,
                duration_ms,
            } => {
                let success = self.engine.trigger(channel, pulse_duration(duration_ms));
                debug!(channel, duration_ms, success, "immediate_trigger handled");
                if duration_ms > 0 && success {
                    self.schedule_deferred_stop(vec![channel], duration_ms);
                }
                Some(ServerEvent::ImmediateTriggerResponse {
                    channel,
                    duration: duration_ms,
                    success,
                })
            }
            Command::StopChannels { channels } => {
                let stopped = if channels.is_empty() {
                    self.engine.stop_all();
                    StoppedChannels::All
                } else {
                    let results: BTreeMap<ChannelId, bool> = channels
                        .iter()
                        .map(|&channel| (channel, self.engine.stop(channel)))
                        .collect();
                    debug!(?results, "stop_channels handled");
                    StoppedChannels::Listed(channels)
                };
                // per-channel stop failures are logged by the engine only
                Some(ServerEvent::StopChannelsResponse {
                    channels: stopped,
                    success: true,
                })
            }
            Command::Ping => Some(ServerEvent::pong()),
        }
    }

    fn schedule_deferred_stop(&self, channels: Vec<ChannelId>, duration_ms: i64) {
        if !self.options.deferred_stop {
            return;
        }
        let engine = self.engine.clone();
        let delay = pulse_duration(duration_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for channel in channels {
                engine.stop(channel);
            }
        });
    }
}
