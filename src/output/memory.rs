//! In-memory output adapter.
//!
//! Stands in for real GPIO on development machines and in tests. Recent
//! operations are kept in a bounded history so tests can assert on exactly
//! which levels were written and in what order without a long-running
//! development server growing without limit.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use tracing::{debug, info};

use super::{OutputAdapter, PinId, PinLevel, lock};
use crate::error::OutputError;

/// One recorded adapter operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputOp {
    /// `configure(pin)`
    Configure(PinId),
    /// `write(pin, level)`
    Write(PinId, PinLevel),
    /// `release()`
    Release,
}

/// Number of operations [`MemoryOutput::new`] remembers.
pub const DEFAULT_HISTORY_LIMIT: usize = 4096;

#[derive(Debug)]
struct MemoryState {
    history: VecDeque<OutputOp>,
    history_limit: usize,
    released: bool,
    levels: BTreeMap<PinId, PinLevel>,
    failing: BTreeSet<PinId>,
}

impl MemoryState {
    fn record(&mut self, op: OutputOp) {
        if self.history_limit == 0 {
            return;
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(op);
    }
}

/// Output adapter that keeps pin levels in memory.
#[derive(Debug)]
pub struct MemoryOutput {
    state: Mutex<MemoryState>,
}

impl Default for MemoryOutput {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl MemoryOutput {
    /// Creates an adapter with no configured pins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an adapter that remembers at most `limit` operations,
    /// dropping the oldest first. `0` disables the history.
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                history: VecDeque::with_capacity(limit.min(DEFAULT_HISTORY_LIMIT)),
                history_limit: limit,
                released: false,
                levels: BTreeMap::new(),
                failing: BTreeSet::new(),
            }),
        }
    }

    /// Makes every subsequent `configure`/`write` on `pin` fail.
    pub fn fail_pin(&self, pin: PinId) {
        lock(&self.state).failing.insert(pin);
    }

    /// Undoes [`fail_pin`](Self::fail_pin).
    pub fn heal_pin(&self, pin: PinId) {
        lock(&self.state).failing.remove(&pin);
    }

    /// Remembered successful operations in the order they happened.
    #[must_use]
    pub fn history(&self) -> Vec<OutputOp> {
        lock(&self.state).history.iter().copied().collect()
    }

    /// Levels successfully written to `pin`, oldest first.
    #[must_use]
    pub fn writes_for(&self, pin: PinId) -> Vec<PinLevel> {
        lock(&self.state)
            .history
            .iter()
            .filter_map(|op| match op {
                OutputOp::Write(p, level) if *p == pin => Some(*level),
                _ => None,
            })
            .collect()
    }

    /// Current level of `pin`, if it has been written since configuration.
    #[must_use]
    pub fn level(&self, pin: PinId) -> Option<PinLevel> {
        lock(&self.state).levels.get(&pin).copied()
    }

    /// Whether `release()` has been called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }
}

impl OutputAdapter for MemoryOutput {
    fn configure(&self, pin: PinId) -> Result<(), OutputError> {
        let mut state = lock(&self.state);
        if state.failing.contains(&pin) {
            return Err(OutputError::Configure {
                pin,
                reason: "injected failure".into(),
            });
        }
        state.record(OutputOp::Configure(pin));
        state.levels.remove(&pin);
        drop(state);
        info!(pin, "[mock] pin configured as output");
        Ok(())
    }

    fn write(&self, pin: PinId, level: PinLevel) -> Result<(), OutputError> {
        let mut state = lock(&self.state);
        if state.failing.contains(&pin) {
            return Err(OutputError::Write {
                pin,
                reason: "injected failure".into(),
            });
        }
        state.record(OutputOp::Write(pin, level));
        state.levels.insert(pin, level);
        drop(state);
        debug!(pin, %level, "[mock] pin written");
        Ok(())
    }

    fn release(&self) -> Result<(), OutputError> {
        let mut state = lock(&self.state);
        state.record(OutputOp::Release);
        state.released = true;
        state.levels.clear();
        drop(state);
        info!("[mock] output released");
        Ok(())
    }

    fn is_hardware(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_operations_in_order() {
        let out = MemoryOutput::new();
        out.configure(4).unwrap();
        out.write(4, PinLevel::High).unwrap();
        out.write(4, PinLevel::Low).unwrap();
        out.release().unwrap();
        assert_eq!(
            out.history(),
            vec![
                OutputOp::Configure(4),
                OutputOp::Write(4, PinLevel::High),
                OutputOp::Write(4, PinLevel::Low),
                OutputOp::Release,
            ]
        );
        assert!(out.is_released());
    }

    #[test]
    fn tracks_current_level_per_pin() {
        let out = MemoryOutput::new();
        out.write(2, PinLevel::High).unwrap();
        out.write(3, PinLevel::Low).unwrap();
        assert_eq!(out.level(2), Some(PinLevel::High));
        assert_eq!(out.level(3), Some(PinLevel::Low));
        assert_eq!(out.level(9), None);
        assert_eq!(out.writes_for(2), vec![PinLevel::High]);
    }

    #[test]
    fn injected_failures_are_not_recorded() {
        let out = MemoryOutput::new();
        out.fail_pin(17);
        assert!(matches!(
            out.configure(17),
            Err(OutputError::Configure { pin: 17, .. })
        ));
        assert!(matches!(
            out.write(17, PinLevel::Low),
            Err(OutputError::Write { pin: 17, .. })
        ));
        assert!(out.history().is_empty());

        out.heal_pin(17);
        out.write(17, PinLevel::Low).unwrap();
        assert_eq!(out.writes_for(17), vec![PinLevel::Low]);
    }

    #[test]
    fn history_keeps_only_recent_operations() {
        let out = MemoryOutput::with_history_limit(3);
        out.configure(4).unwrap();
        for _ in 0..10_000 {
            out.write(4, PinLevel::Low).unwrap();
            out.write(4, PinLevel::High).unwrap();
        }
        out.release().unwrap();
        assert_eq!(
            out.history(),
            vec![
                OutputOp::Write(4, PinLevel::Low),
                OutputOp::Write(4, PinLevel::High),
                OutputOp::Release,
            ]
        );
        assert!(out.is_released());
    }

    #[test]
    fn default_history_is_bounded() {
        let out = MemoryOutput::new();
        for _ in 0..DEFAULT_HISTORY_LIMIT {
            out.write(2, PinLevel::Low).unwrap();
        }
        out.write(2, PinLevel::High).unwrap();
        let history = out.history();
        assert_eq!(history.len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(history.last(), Some(&OutputOp::Write(2, PinLevel::High)));
        assert_eq!(out.level(2), Some(PinLevel::High));
    }

    #[test]
    fn disabled_history_still_tracks_levels() {
        let out = MemoryOutput::with_history_limit(0);
        out.write(2, PinLevel::Low).unwrap();
        out.release().unwrap();
        assert!(out.history().is_empty());
        assert!(out.is_released());
    }

    #[test]
    fn is_not_hardware() {
        assert!(!MemoryOutput::new().is_hardware());
    }
}
