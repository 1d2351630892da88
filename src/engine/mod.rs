//! Channel trigger engine.
//!
//! Owns the channel mapping and per-channel state, and is the only caller of
//! the [`OutputAdapter`]. A trigger pulls the channel's line active and
//! schedules a release task that restores idle after the requested
//! duration; a retrigger cancels the previous release, so the pulse always
//! ends `duration` after the latest call.
//!
//! All channel state sits behind one mutex. Output writes happen while it is
//! held, which gives every channel a single total order of writes: a release
//! task that lost the race to a newer trigger or stop finds its id gone and
//! does nothing.

mod state;

pub use state::Level;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ChannelId, ChannelMapping};
use crate::error::OutputError;
use crate::observability::metrics;
use crate::output::{OutputAdapter, PinId, lock};

use state::{ChannelState, PendingRelease, ReleaseId};

/// Length of each self-test pulse.
pub const SELF_TEST_PULSE: Duration = Duration::from_millis(100);

/// Gap between self-test pulses.
pub const SELF_TEST_GAP: Duration = Duration::from_millis(50);

/// Handle to the trigger engine.
///
/// Cheap to clone; all clones share the same channels. Triggers spawn their
/// release tasks on the ambient Tokio runtime.
#[derive(Debug, Clone)]
pub struct ChannelEngine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    mapping: ChannelMapping,
    output: Arc<dyn OutputAdapter>,
    channels: Mutex<BTreeMap<ChannelId, ChannelState>>,
    next_release_id: AtomicU64,
    shut_down: AtomicBool,
}

impl ChannelEngine {
    /// Configures every mapped pin as an output and drives it idle.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error for the first pin that cannot be
    /// configured or set idle. The engine must not be used with partially
    /// initialised hardware, so nothing is retried.
    pub fn new(mapping: ChannelMapping, output: Arc<dyn OutputAdapter>) -> Result<Self, OutputError> {
        info!(
            channels = mapping.len(),
            hardware = output.is_hardware(),
            "initializing channel engine"
        );

        let mut channels = BTreeMap::new();
        for (channel, pin) in mapping.iter() {
            if let Err(e) = init_pin(output.as_ref(), pin) {
                error!(channel, pin, error = %e, "failed to initialize output pin");
                // pins set up so far must not stay claimed
                if let Err(release_err) = output.release() {
                    error!(error = %release_err, "failed to release output adapter");
                }
                return Err(e);
            }
            info!(channel, pin, "channel initialized (idle)");
            channels.insert(channel, ChannelState::new(pin));
        }

        Ok(Self {
            inner: Arc::new(EngineInner {
                mapping,
                output,
                channels: Mutex::new(channels),
                next_release_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Starts a pulse on `channel` that ends `duration` from now.
    ///
    /// Cancels any pending release on the channel first. Returns `false`
    /// without side effects if the channel is unmapped or the engine has
    /// been shut down, and `false` if the output write fails.
    pub fn trigger(&self, channel: ChannelId, duration: Duration) -> bool {
        let Some(pin) = self.inner.mapping.pin(channel) else {
            warn!(channel, "invalid channel");
            metrics::record_trigger(false);
            return false;
        };

        let mut channels = lock(&self.inner.channels);
        if self.inner.is_shut_down() {
            drop(channels);
            warn!(channel, "trigger after engine shutdown");
            return false;
        }
        let Some(state) = channels.get_mut(&channel) else {
            return false;
        };

        if state.cancel_pending().is_some() {
            debug!(channel, pin, "retrigger, previous release cancelled");
        }

        if let Err(e) = self.inner.output.write(pin, Level::Active.pin_level()) {
            error!(channel, pin, error = %e, "failed to trigger channel");
            state.faulted = true;
            match self.inner.output.write(pin, Level::Idle.pin_level()) {
                Ok(()) => state.level = Level::Idle,
                Err(e) => error!(channel, pin, error = %e, "failed to restore idle after trigger failure"),
            }
            metrics::record_trigger(false);
            return false;
        }
        state.level = Level::Active;
        state.faulted = false;

        let id = self.inner.next_release_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(release_after(
            Arc::downgrade(&self.inner),
            channel,
            id,
            cancel.clone(),
            duration,
        ));
        state.pending = Some(PendingRelease::new(id, cancel, handle));

        let active = count_pending(&channels);
        drop(channels);

        debug!(channel, pin, duration_ms = duration.as_millis(), "channel triggered");
        metrics::record_trigger(true);
        metrics::set_active_channels(active);
        true
    }

    /// Triggers each channel in order, independently.
    ///
    /// One channel's failure does not affect the others; there is no
    /// all-or-nothing guarantee.
    pub fn trigger_many(
        &self,
        channels: &[ChannelId],
        duration: Duration,
    ) -> BTreeMap<ChannelId, bool> {
        channels
            .iter()
            .map(|&channel| (channel, self.trigger(channel, duration)))
            .collect()
    }

    /// Ends any pulse on `channel` and drives it idle immediately.
    ///
    /// Idempotent: stopping an idle channel re-asserts idle and succeeds.
    /// Returns `false` if the channel is unmapped, the write fails, or the
    /// engine has been shut down.
    pub fn stop(&self, channel: ChannelId) -> bool {
        let Some(pin) = self.inner.mapping.pin(channel) else {
            warn!(channel, "invalid channel");
            return false;
        };

        let mut channels = lock(&self.inner.channels);
        if self.inner.is_shut_down() {
            drop(channels);
            debug!(channel, "stop after engine shutdown ignored");
            return false;
        }
        let Some(state) = channels.get_mut(&channel) else {
            return false;
        };
        state.cancel_pending();
        let ok = self.inner.write_idle(channel, state);
        let active = count_pending(&channels);
        drop(channels);

        if ok {
            debug!(channel, pin, "channel stopped");
        }
        metrics::set_active_channels(active);
        ok
    }

    /// Cancels every pending release and drives every channel idle.
    ///
    /// Does nothing once the engine has been shut down.
    pub fn stop_all(&self) {
        let mut channels = lock(&self.inner.channels);
        if self.inner.is_shut_down() {
            return;
        }
        // Cancelled tasks exit on their own; nothing to wait for here.
        drop(self.inner.idle_all(&mut channels));
        drop(channels);
        metrics::set_active_channels(0);
        debug!("all channels stopped");
    }

    /// Tears the engine down: cancels all releases, waits for their tasks,
    /// drives every pin idle and releases the output adapter.
    ///
    /// Later calls are no-ops. Triggers after shutdown fail.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error if releasing it fails.
    pub async fn shutdown(&self) -> Result<(), OutputError> {
        // flag and idle writes share the lock, so no trigger can slip in
        // between them
        let handles = {
            let mut channels = lock(&self.inner.channels);
            if self.inner.shut_down.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            self.inner.idle_all(&mut channels)
        };
        info!("shutting down channel engine");

        for handle in handles {
            match handle.await {
                Err(e) if e.is_panic() => error!(error = %e, "release task panicked"),
                _ => {}
            }
        }
        metrics::set_active_channels(0);

        self.inner.output.release().inspect_err(|e| {
            error!(error = %e, "failed to release output adapter");
        })?;
        info!("channel engine shut down");
        Ok(())
    }

    /// Pulses every mapped channel once, in channel order.
    ///
    /// Each line goes active for [`SELF_TEST_PULSE`], then idle, with a
    /// [`SELF_TEST_GAP`] before the next. Failures are logged and the
    /// sequence continues with the next channel.
    pub async fn self_test(&self) {
        info!("starting output self-test");
        for (channel, pin) in self.inner.mapping.iter() {
            info!(channel, pin, "testing pin");
            if let Err(e) = self.inner.write_raw(channel, pin, Level::Active) {
                error!(channel, pin, error = %e, "self-test pulse failed");
                continue;
            }
            tokio::time::sleep(SELF_TEST_PULSE).await;
            if let Err(e) = self.inner.write_raw(channel, pin, Level::Idle) {
                error!(channel, pin, error = %e, "self-test restore failed");
            }
            tokio::time::sleep(SELF_TEST_GAP).await;
        }
        info!("output self-test completed");
    }

    /// Whether the hardware output adapter is in use.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.output.is_hardware()
    }

    /// The channel mapping.
    #[must_use]
    pub fn mapping(&self) -> &ChannelMapping {
        &self.inner.mapping
    }

    /// Channels with a pending release, in ascending order.
    #[must_use]
    pub fn active_channels(&self) -> Vec<ChannelId> {
        lock(&self.inner.channels)
            .iter()
            .filter(|(_, state)| state.pending.is_some())
            .map(|(channel, _)| *channel)
            .collect()
    }

    /// Channels whose last write failed, in ascending order.
    #[must_use]
    pub fn faulted_channels(&self) -> Vec<ChannelId> {
        lock(&self.inner.channels)
            .iter()
            .filter(|(_, state)| state.faulted)
            .map(|(channel, _)| *channel)
            .collect()
    }

    /// Logical level of `channel`, or `None` if unmapped.
    #[must_use]
    pub fn level(&self, channel: ChannelId) -> Option<Level> {
        lock(&self.inner.channels).get(&channel).map(|s| s.level)
    }
}

impl EngineInner {
    /// Only meaningful while `channels` is locked.
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Drives `state` idle, updating level and fault flag.
    fn write_idle(&self, channel: ChannelId, state: &mut ChannelState) -> bool {
        match self.output.write(state.pin, Level::Idle.pin_level()) {
            Ok(()) => {
                state.level = Level::Idle;
                state.faulted = false;
                true
            }
            Err(e) => {
                error!(channel, pin = state.pin, error = %e, "failed to set channel idle");
                state.faulted = true;
                false
            }
        }
    }

    /// Cancels every release and writes every channel idle, returning the
    /// cancelled tasks.
    fn idle_all(&self, channels: &mut BTreeMap<ChannelId, ChannelState>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for (channel, state) in channels.iter_mut() {
            handles.extend(state.cancel_pending());
            self.write_idle(*channel, state);
        }
        handles
    }

    /// Writes a level without touching release bookkeeping (self-test only).
    fn write_raw(&self, channel: ChannelId, pin: PinId, level: Level) -> Result<(), OutputError> {
        let mut channels = lock(&self.channels);
        if self.is_shut_down() {
            return Err(OutputError::Unavailable("engine has been shut down".into()));
        }
        let result = self.output.write(pin, level.pin_level());
        if let Some(state) = channels.get_mut(&channel) {
            if result.is_ok() {
                state.level = level;
                state.faulted = false;
            } else {
                state.faulted = true;
            }
        }
        result
    }

    /// Body of a release task once its delay has elapsed.
    fn complete_release(&self, channel: ChannelId, id: ReleaseId) {
        let mut channels = lock(&self.channels);
        let Some(state) = channels.get_mut(&channel) else {
            return;
        };
        if state.pending.as_ref().map(|p| p.id) != Some(id) {
            debug!(channel, release_id = id, "release superseded");
            return;
        }
        state.pending = None;
        if self.write_idle(channel, state) {
            debug!(channel, pin = state.pin, "channel released");
        }
        let active = count_pending(&channels);
        drop(channels);

        metrics::record_release();
        metrics::set_active_channels(active);
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if *self.shut_down.get_mut() {
            return;
        }
        warn!("channel engine dropped without shutdown, forcing outputs idle");
        let channels = self
            .channels
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for state in channels.values_mut() {
            drop(state.cancel_pending());
            if let Err(e) = self.output.write(state.pin, Level::Idle.pin_level()) {
                error!(pin = state.pin, error = %e, "failed to set pin idle on drop");
            }
        }
        if let Err(e) = self.output.release() {
            error!(error = %e, "failed to release output adapter on drop");
        }
    }
}

/// Waits out `duration`, then restores `channel` to idle unless `id` has
/// been superseded in the meantime.
async fn release_after(
    engine: Weak<EngineInner>,
    channel: ChannelId,
    id: ReleaseId,
    cancel: CancellationToken,
    duration: Duration,
) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(duration) => {}
    }
    if let Some(engine) = engine.upgrade() {
        engine.complete_release(channel, id);
    }
}

fn init_pin(output: &dyn OutputAdapter, pin: PinId) -> Result<(), OutputError> {
    output.configure(pin)?;
    output.write(pin, Level::Idle.pin_level())
}

fn count_pending(channels: &BTreeMap<ChannelId, ChannelState>) -> usize {
    channels.values().filter(|s| s.pending.is_some()).count()
}
