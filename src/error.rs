//! Error types for `gpio-sequencer`
//!
//! One error enum per concern, aggregated by [`SequencerError`] which also
//! maps every failure onto a process exit code.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ChannelId;
use crate::output::PinId;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `gpio-sequencer` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// Configuration error (unreadable or invalid mapping file)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Transport error (bind failed, server error)
    pub const TRANSPORT_ERROR: i32 = 4;

    /// Output adapter error (pin could not be configured or released)
    pub const OUTPUT_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options), reported
    /// instead of clap's own exit code
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `gpio-sequencer` operations.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// Mapping file loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Output adapter error
    #[error(transparent)]
    Output(#[from] OutputError),

    /// HTTP / WebSocket transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SequencerError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) => ExitCode::CONFIG_ERROR,
            Self::Output(_) => ExitCode::OUTPUT_ERROR,
            Self::Transport(_) => ExitCode::TRANSPORT_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Channel mapping file errors.
///
/// `serve` recovers from all of these by falling back to the built-in
/// mapping; `validate` reports them.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// Path to the mapping file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid JSON
    #[error("parse error in {path}: {message}")]
    Parse {
        /// Path to the mapping file
        path: PathBuf,
        /// Error message from the parser
        message: String,
    },

    /// The `channel_mapping` object is missing
    #[error("missing required field 'channel_mapping' in {path}")]
    MissingMapping {
        /// Path to the mapping file
        path: PathBuf,
    },

    /// A channel key is not a non-negative integer
    #[error("invalid channel id '{key}': expected a non-negative integer")]
    InvalidChannel {
        /// The offending key
        key: String,
    },

    /// A pin value is not a non-negative integer
    #[error("invalid pin for channel {channel}: got '{value}', expected a non-negative integer")]
    InvalidPin {
        /// Channel the pin belongs to
        channel: ChannelId,
        /// The offending value, rendered as JSON
        value: String,
    },

    /// The mapping has no channels
    #[error("channel mapping in {path} is empty")]
    Empty {
        /// Path to the mapping file
        path: PathBuf,
    },
}

// ============================================================================
// Output Errors
// ============================================================================

/// Output adapter failures.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Pin could not be configured as an output
    #[error("failed to configure pin {pin}: {reason}")]
    Configure {
        /// Pin being configured
        pin: PinId,
        /// Adapter-specific reason
        reason: String,
    },

    /// Level write was rejected
    #[error("failed to write pin {pin}: {reason}")]
    Write {
        /// Pin being written
        pin: PinId,
        /// Adapter-specific reason
        reason: String,
    },

    /// Adapter could not be released
    #[error("failed to release output adapter: {0}")]
    Release(String),

    /// Requested adapter is not present on this host
    #[error("output adapter unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Protocol Errors
// ============================================================================

/// Inbound message decoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Frame is JSON but not an object with a string `type`
    #[error("message must be an object with a string 'type' field")]
    MissingType,

    /// `type` names no known command
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Payload failed validation
    #[error("{0}")]
    InvalidPayload(String),
}

impl ProtocolError {
    /// Whether this error ends the connection's receive loop.
    ///
    /// Only frames that are not JSON at all are fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidJson(_))
    }
}

// ============================================================================
// Transport Errors
// ============================================================================

/// HTTP / WebSocket transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind the listener
    #[error("bind failed on {addr}: {source}")]
    Bind {
        /// Requested bind address
        addr: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Bind address could not be parsed
    #[error("invalid bind address \"{0}\"")]
    InvalidAddress(String),

    /// Server loop terminated with an error
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
