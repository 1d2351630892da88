//! WebSocket message protocol.
//!
//! Every frame, in both directions, is a JSON object of the form
//! `{"type": <string>, "data": <object>}`. Inbound frames decode into a
//! [`Command`]; outbound frames are encoded from a [`ServerEvent`].
//!
//! Decoding happens in two stages so the caller can tell a frame that is
//! not JSON at all (fatal for the connection) from a well-formed message
//! with a bad type or payload (reported, connection stays open).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::{ChannelId, ChannelMapping};
use crate::error::ProtocolError;

/// Pulse length used when a trigger command omits `duration`.
pub const DEFAULT_DURATION_MS: i64 = 50;

// ============================================================================
// Inbound
// ============================================================================

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pulse several channels with one duration.
    GpioTrigger {
        /// Channels in the order given by the client.
        channels: Vec<ChannelId>,
        /// Requested pulse length, as sent.
        duration_ms: i64,
    },
    /// Pulse a single channel.
    ImmediateTrigger {
        /// Channel to pulse.
        channel: ChannelId,
        /// Requested pulse length, as sent.
        duration_ms: i64,
    },
    /// Drive channels idle. Empty means every channel.
    StopChannels {
        /// Channels to stop.
        channels: Vec<ChannelId>,
    },
    /// Liveness check.
    Ping,
}

impl Command {
    /// Wire name of this command's `type`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::GpioTrigger { .. } => "gpio_trigger",
            Self::ImmediateTrigger { .. } => "immediate_trigger",
            Self::StopChannels { .. } => "stop_channels",
            Self::Ping => "ping",
        }
    }

    /// Decodes one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidJson`] if `text` is not JSON, or
    /// one of the non-fatal variants if the message is malformed.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Decodes an already-parsed message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingType`] if the message has no string
    /// `type`, [`ProtocolError::UnknownType`] for an unrecognised `type`,
    /// and [`ProtocolError::InvalidPayload`] if `data` fails validation.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut message) = value else {
            return Err(ProtocolError::MissingType);
        };
        let Some(Value::String(kind)) = message.remove("type") else {
            return Err(ProtocolError::MissingType);
        };
        let data = match message.remove("data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(data)) => data,
            Some(_) => {
                return Err(ProtocolError::InvalidPayload(
                    "Message data must be an object".into(),
                ));
            }
        };

        match kind.as_str() {
            "gpio_trigger" => Ok(Self::GpioTrigger {
                channels: channel_list(&data)?,
                duration_ms: duration(&data)?,
            }),
            "immediate_trigger" => {
                let channel = match data.get("channel") {
                    None | Some(Value::Null) => {
                        return Err(ProtocolError::InvalidPayload("Channel is required".into()));
                    }
                    Some(value) => value.as_i64().ok_or_else(|| {
                        ProtocolError::InvalidPayload("Channel must be an integer".into())
                    })?,
                };
                Ok(Self::ImmediateTrigger {
                    channel,
                    duration_ms: duration(&data)?,
                })
            }
            "stop_channels" => Ok(Self::StopChannels {
                channels: channel_list(&data)?,
            }),
            "ping" => Ok(Self::Ping),
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

/// Reads `data.channels`; absent or null is an empty list.
fn channel_list(data: &Map<String, Value>) -> Result<Vec<ChannelId>, ProtocolError> {
    match data.get("channels") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_i64().ok_or_else(|| {
                    ProtocolError::InvalidPayload("Channels must be integers".into())
                })
            })
            .collect(),
        Some(_) => Err(ProtocolError::InvalidPayload(
            "Channels must be a list".into(),
        )),
    }
}

/// Reads `data.duration` in milliseconds, defaulting to
/// [`DEFAULT_DURATION_MS`].
fn duration(data: &Map<String, Value>) -> Result<i64, ProtocolError> {
    match data.get("duration") {
        None | Some(Value::Null) => Ok(DEFAULT_DURATION_MS),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| ProtocolError::InvalidPayload("Duration must be an integer".into())),
    }
}

/// Converts a client duration to a pulse length. Negative values mean an
/// immediate release.
#[must_use]
pub fn pulse_duration(duration_ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(duration_ms).unwrap_or(0))
}

// ============================================================================
// Outbound
// ============================================================================

/// A server-to-client message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once when a connection opens.
    ConnectionStatus {
        /// Always `true`.
        connected: bool,
        /// Whether hardware output is in use.
        gpio_available: bool,
        /// Channel to pin mapping.
        channel_mapping: ChannelMapping,
    },
    /// Reply to `gpio_trigger`.
    GpioTriggerResponse {
        /// Channels as requested.
        channels: Vec<ChannelId>,
        /// Duration as requested.
        duration: i64,
        /// Per-channel trigger result.
        results: BTreeMap<ChannelId, bool>,
        /// `true` iff every result is `true`.
        success: bool,
    },
    /// Reply to `immediate_trigger`.
    ImmediateTriggerResponse {
        /// Channel as requested.
        channel: ChannelId,
        /// Duration as requested.
        duration: i64,
        /// Trigger result.
        success: bool,
    },
    /// Reply to `stop_channels`.
    StopChannelsResponse {
        /// Channels stopped.
        channels: StoppedChannels,
        /// Always `true`.
        success: bool,
    },
    /// Reply to `ping`.
    Pong {
        /// Server time in seconds since the Unix epoch.
        timestamp: f64,
    },
    /// A request could not be processed.
    Error {
        /// Human-readable description.
        error: String,
        /// Channel the error concerns, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<ChannelId>,
    },
}

impl ServerEvent {
    /// Builds the `connection_status` greeting.
    #[must_use]
    pub const fn connection_status(gpio_available: bool, channel_mapping: ChannelMapping) -> Self {
        Self::ConnectionStatus {
            connected: true,
            gpio_available,
            channel_mapping,
        }
    }

    /// Builds a `pong` stamped with the current time.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        }
    }

    /// Builds an `error` event.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            channel: None,
        }
    }

    /// Wire name of this event's `type`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionStatus { .. } => "connection_status",
            Self::GpioTriggerResponse { .. } => "gpio_trigger_response",
            Self::ImmediateTriggerResponse { .. } => "immediate_trigger_response",
            Self::StopChannelsResponse { .. } => "stop_channels_response",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
        }
    }

    /// Serializes the event to a text frame.
    ///
    /// # Errors
    ///
    /// Returns a serialization error (not expected for these types).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// `channels` field of `stop_channels_response`: a list, or the literal
/// string `"all"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoppedChannels {
    /// Every channel was stopped.
    All,
    /// Only these channels were stopped.
    Listed(Vec<ChannelId>),
}

impl Serialize for StoppedChannels {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Listed(channels) => channels.serialize(serializer),
        }
    }
}
