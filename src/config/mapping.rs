//! Channel-to-pin mapping.
//!
//! The mapping is built once at startup and never mutated afterwards; the
//! engine and the status messages only ever read it.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::output::PinId;

/// Logical trigger channel identifier.
///
/// Signed because clients may reference any integer; only non-negative ids
/// can appear in a [`ChannelMapping`].
pub type ChannelId = i64;

/// Built-in mapping used when no usable mapping file is provided.
pub const DEFAULT_CHANNEL_MAPPING: [(ChannelId, PinId); 8] = [
    (0, 2),
    (1, 3),
    (2, 4),
    (3, 17),
    (4, 27),
    (5, 22),
    (6, 10),
    (7, 9),
];

/// Immutable mapping from channel to output pin.
///
/// Serializes as a JSON object keyed by the channel id rendered as a string,
/// e.g. `{"0": 2, "1": 3}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChannelMapping(BTreeMap<ChannelId, PinId>);

impl ChannelMapping {
    /// Creates a mapping from `(channel, pin)` pairs.
    ///
    /// A channel listed more than once keeps its last pin.
    #[must_use]
    pub fn new(pairs: impl IntoIterator<Item = (ChannelId, PinId)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    /// Returns the pin for `channel`, if mapped.
    #[must_use]
    pub fn pin(&self, channel: ChannelId) -> Option<PinId> {
        self.0.get(&channel).copied()
    }

    /// Mapped channels in ascending order.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelId> {
        self.0.keys().copied().collect()
    }

    /// Iterates `(channel, pin)` pairs in channel order.
    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, PinId)> + '_ {
        self.0.iter().map(|(c, p)| (*c, *p))
    }

    /// Number of mapped channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no channel is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pins that more than one channel maps to, each with its channels.
    #[must_use]
    pub fn shared_pins(&self) -> BTreeMap<PinId, Vec<ChannelId>> {
        let mut by_pin: BTreeMap<PinId, Vec<ChannelId>> = BTreeMap::new();
        for (channel, pin) in self.iter() {
            by_pin.entry(pin).or_default().push(channel);
        }
        by_pin.retain(|_, channels| channels.len() > 1);
        by_pin
    }
}

impl Default for ChannelMapping {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_MAPPING)
    }
}
