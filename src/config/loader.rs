//! Channel mapping loader.
//!
//! The mapping file is a JSON object whose `channel_mapping` entry maps
//! string channel ids to integer pins:
//!
//! ```json
//! { "channel_mapping": { "0": 2, "1": 3 } }
//! ```
//!
//! [`read_mapping`] is strict and reports every problem as a
//! [`ConfigError`]. [`load_mapping`] is what the server uses: any problem
//! degrades to the built-in mapping with a warning, so a broken file never
//! keeps the sequencer from starting.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::config::mapping::{ChannelId, ChannelMapping};
use crate::error::ConfigError;
use crate::output::PinId;

/// Where a loaded mapping came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingSource {
    /// The built-in default mapping.
    BuiltIn,
    /// A mapping file.
    File(PathBuf),
}

impl fmt::Display for MappingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn => write!(f, "built-in"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Warning during mapping loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

/// On-disk shape of a mapping file. Keys and pins are checked separately so
/// errors can name the offending entry.
#[derive(Debug, Deserialize)]
struct MappingFile {
    channel_mapping: Option<BTreeMap<String, Value>>,
}

/// Result of [`load_mapping`].
#[derive(Debug, Clone)]
pub struct LoadedMapping {
    /// The mapping to use.
    pub mapping: ChannelMapping,

    /// Where it came from.
    pub source: MappingSource,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Loads the mapping, falling back to the built-in default.
///
/// Never fails: a missing path, unreadable file, malformed JSON, absent
/// `channel_mapping` entry, or invalid key/value all produce the default
/// mapping plus a warning explaining why.
#[must_use]
pub fn load_mapping(path: Option<&Path>) -> LoadedMapping {
    let Some(path) = path else {
        return LoadedMapping {
            mapping: ChannelMapping::default(),
            source: MappingSource::BuiltIn,
            warnings: Vec::new(),
        };
    };

    match read_mapping(path) {
        Ok(mapping) => {
            let warnings = shared_pin_warnings(&mapping, path);
            LoadedMapping {
                mapping,
                source: MappingSource::File(path.to_path_buf()),
                warnings,
            }
        }
        Err(err) => LoadedMapping {
            mapping: ChannelMapping::default(),
            source: MappingSource::BuiltIn,
            warnings: vec![LoadWarning {
                message: format!("{err}; using built-in channel mapping"),
                location: Some(path.display().to_string()),
            }],
        },
    }
}

/// Reads and parses a mapping file.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or does not contain
/// a valid, non-empty `channel_mapping` object.
pub fn read_mapping(path: &Path) -> Result<ChannelMapping, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_mapping(path, &raw)
}

/// Parses mapping file contents.
///
/// `path` is only used for error messages.
///
/// # Errors
///
/// Returns a [`ConfigError`] describing the first problem found.
pub fn parse_mapping(path: &Path, raw: &str) -> Result<ChannelMapping, ConfigError> {
    let file: MappingFile = serde_json::from_str(raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let Some(entries) = file.channel_mapping else {
        return Err(ConfigError::MissingMapping {
            path: path.to_path_buf(),
        });
    };

    let mut pairs = Vec::with_capacity(entries.len());
    for (key, value) in &entries {
        let channel = parse_channel_key(key)?;
        let pin = value
            .as_u64()
            .and_then(|p| PinId::try_from(p).ok())
            .ok_or_else(|| ConfigError::InvalidPin {
                channel,
                value: value.to_string(),
            })?;
        pairs.push((channel, pin));
    }

    if pairs.is_empty() {
        return Err(ConfigError::Empty {
            path: path.to_path_buf(),
        });
    }

    Ok(ChannelMapping::new(pairs))
}

fn parse_channel_key(key: &str) -> Result<ChannelId, ConfigError> {
    key.trim()
        .parse::<u32>()
        .map(ChannelId::from)
        .map_err(|_| ConfigError::InvalidChannel {
            key: key.to_owned(),
        })
}

fn shared_pin_warnings(mapping: &ChannelMapping, path: &Path) -> Vec<LoadWarning> {
    mapping
        .shared_pins()
        .into_iter()
        .map(|(pin, channels)| LoadWarning {
            message: format!("pin {pin} is shared by channels {channels:?}"),
            location: Some(path.display().to_string()),
        })
        .collect()
}
