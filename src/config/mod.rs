//! Configuration module
//!
//! Loads the channel-to-pin mapping consumed by the trigger engine.

pub mod loader;
pub mod mapping;

pub use loader::{
    LoadWarning, LoadedMapping, MappingSource, load_mapping, parse_mapping, read_mapping,
};
pub use mapping::{ChannelId, ChannelMapping, DEFAULT_CHANNEL_MAPPING};
