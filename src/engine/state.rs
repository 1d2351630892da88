//! Per-channel state.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::output::{PinId, PinLevel};

/// Logical line state of a channel.
///
/// Lines are active-low: [`Level::Idle`] holds the pin high and
/// [`Level::Active`] pulls it low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    /// Safe resting state.
    #[default]
    Idle,
    /// Momentary pulse state.
    Active,
}

impl Level {
    /// Physical level the output adapter must be told for this state.
    #[must_use]
    pub const fn pin_level(self) -> PinLevel {
        match self {
            Self::Idle => PinLevel::High,
            Self::Active => PinLevel::Low,
        }
    }
}

/// Identity of one scheduled release. Never reused within an engine.
pub(crate) type ReleaseId = u64;

/// A scheduled restore-to-idle for one channel.
#[derive(Debug)]
pub(crate) struct PendingRelease {
    pub(crate) id: ReleaseId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PendingRelease {
    pub(crate) const fn new(id: ReleaseId, cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { id, cancel, handle }
    }

    /// Cancels the release and hands back its task so the caller may wait
    /// for it to finish.
    ///
    /// A task already past its delay is not interrupted; it will find its id
    /// no longer pending and leave the channel alone.
    pub(crate) fn cancel(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.handle
    }
}

/// Mutable state of one mapped channel.
#[derive(Debug)]
pub(crate) struct ChannelState {
    pub(crate) pin: PinId,
    pub(crate) level: Level,
    pub(crate) pending: Option<PendingRelease>,
    /// Set when a write on this pin failed; cleared by the next successful
    /// command or release write.
    pub(crate) faulted: bool,
}

impl ChannelState {
    pub(crate) const fn new(pin: PinId) -> Self {
        Self {
            pin,
            level: Level::Idle,
            pending: None,
            faulted: false,
        }
    }

    /// Cancels the pending release, if any.
    pub(crate) fn cancel_pending(&mut self) -> Option<JoinHandle<()>> {
        self.pending.take().map(PendingRelease::cancel)
    }
}
