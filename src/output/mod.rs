//! Output adapters (pin configuration and level writes).
//!
//! The trigger engine talks to hardware only through [`OutputAdapter`]. Two
//! implementations exist: [`SysfsOutput`] drives real lines through the
//! Linux GPIO sysfs interface, and [`MemoryOutput`] is an in-memory stand-in
//! that records every operation. Which one is used is decided once, at
//! startup, by [`select_output`].

pub mod memory;
pub mod sysfs;

pub use memory::{DEFAULT_HISTORY_LIMIT, MemoryOutput, OutputOp};
pub use sysfs::{DEFAULT_GPIO_ROOT, SysfsOutput};

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use clap::ValueEnum;
use tracing::{info, warn};

use crate::error::OutputError;

/// Pin identifier understood by the output adapter (BCM numbering on a
/// Raspberry Pi).
pub type PinId = u32;

/// Physical signal level of an output pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinLevel {
    /// Electrically high.
    High,
    /// Electrically low.
    Low,
}

impl fmt::Display for PinLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Capability to configure and drive output pins.
///
/// Receivers take `&self`; implementations use interior mutability so one
/// adapter can be shared between the engine and its release tasks.
pub trait OutputAdapter: Send + Sync + fmt::Debug {
    /// Configures `pin` as an output.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Configure`] if the pin cannot be claimed.
    fn configure(&self, pin: PinId) -> Result<(), OutputError>;

    /// Drives `pin` to `level`.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Write`] if the level could not be applied.
    fn write(&self, pin: PinId, level: PinLevel) -> Result<(), OutputError>;

    /// Releases every pin claimed by this adapter.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Release`] if cleanup failed.
    fn release(&self) -> Result<(), OutputError>;

    /// Whether this adapter drives real hardware.
    fn is_hardware(&self) -> bool;
}

/// Adapter selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputMode {
    /// Use sysfs GPIO when present, otherwise the in-memory stand-in.
    #[default]
    Auto,
    /// Require sysfs GPIO.
    Sysfs,
    /// Always use the in-memory stand-in.
    Mock,
}

/// Chooses the output adapter for this process.
///
/// # Errors
///
/// Returns [`OutputError::Unavailable`] when `mode` is
/// [`OutputMode::Sysfs`] and `gpio_root` has no sysfs GPIO interface.
pub fn select_output(
    mode: OutputMode,
    gpio_root: &Path,
) -> Result<Arc<dyn OutputAdapter>, OutputError> {
    let sysfs_present = SysfsOutput::is_present(gpio_root);
    match mode {
        OutputMode::Sysfs if !sysfs_present => Err(OutputError::Unavailable(format!(
            "no GPIO sysfs interface at {}",
            gpio_root.display()
        ))),
        OutputMode::Sysfs | OutputMode::Auto if sysfs_present => {
            info!(root = %gpio_root.display(), "using sysfs GPIO output");
            Ok(Arc::new(SysfsOutput::new(gpio_root)))
        }
        OutputMode::Auto => {
            warn!(
                root = %gpio_root.display(),
                "GPIO sysfs interface not found, using in-memory output for development"
            );
            Ok(Arc::new(MemoryOutput::with_history_limit(0)))
        }
        OutputMode::Mock | OutputMode::Sysfs => {
            info!("using in-memory output");
            Ok(Arc::new(MemoryOutput::with_history_limit(0)))
        }
    }
}

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent before
/// any call that could panic, so the poisoned value is safe to reuse.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_level_display() {
        assert_eq!(PinLevel::High.to_string(), "HIGH");
        assert_eq!(PinLevel::Low.to_string(), "LOW");
    }

    #[test]
    fn auto_without_sysfs_uses_memory() {
        let dir = tempfile::tempdir().unwrap();
        let output = select_output(OutputMode::Auto, dir.path()).unwrap();
        assert!(!output.is_hardware());
    }

    #[test]
    fn auto_with_sysfs_uses_hardware() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("export"), "").unwrap();
        let output = select_output(OutputMode::Auto, dir.path()).unwrap();
        assert!(output.is_hardware());
    }

    #[test]
    fn sysfs_mode_requires_interface() {
        let dir = tempfile::tempdir().unwrap();
        let err = select_output(OutputMode::Sysfs, dir.path()).unwrap_err();
        assert!(matches!(err, OutputError::Unavailable(_)));
    }

    #[test]
    fn mock_mode_ignores_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("export"), "").unwrap();
        let output = select_output(OutputMode::Mock, dir.path()).unwrap();
        assert!(!output.is_hardware());
    }

    #[test]
    fn output_mode_default_is_auto() {
        assert_eq!(OutputMode::default(), OutputMode::Auto);
    }
}
