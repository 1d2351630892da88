//! Linux GPIO sysfs output adapter.
//!
//! Uses the kernel's `/sys/class/gpio` ABI: a pin is claimed by writing its
//! number to `export`, which creates `gpioN/`; `gpioN/direction` takes
//! `out` and `gpioN/value` takes `1` or `0`. Writing the number to
//! `unexport` hands the pin back.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{OutputAdapter, PinId, PinLevel, lock};
use crate::error::OutputError;

/// Default sysfs GPIO root.
pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// Attempts to open `gpioN/direction` after exporting; udev may still be
/// fixing permissions on the freshly created node.
const EXPORT_SETTLE_ATTEMPTS: u32 = 20;
const EXPORT_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Output adapter backed by the GPIO sysfs interface.
#[derive(Debug)]
pub struct SysfsOutput {
    root: PathBuf,
    configured: Mutex<BTreeSet<PinId>>,
}

impl SysfsOutput {
    /// Creates an adapter rooted at `root` (normally [`DEFAULT_GPIO_ROOT`]).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            configured: Mutex::new(BTreeSet::new()),
        }
    }

    /// Whether `root` looks like a sysfs GPIO directory.
    #[must_use]
    pub fn is_present(root: &Path) -> bool {
        root.join("export").exists()
    }

    fn pin_dir(&self, pin: PinId) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn export(&self, pin: PinId) -> io::Result<()> {
        if self.pin_dir(pin).exists() {
            debug!(pin, "pin already exported");
            return Ok(());
        }
        std::fs::write(self.root.join("export"), pin.to_string())
    }

    fn set_direction_out(&self, pin: PinId) -> io::Result<()> {
        let direction = self.pin_dir(pin).join("direction");
        let mut attempt = 1;
        loop {
            match std::fs::write(&direction, "out") {
                Ok(()) => return Ok(()),
                Err(e)
                    if attempt < EXPORT_SETTLE_ATTEMPTS
                        && matches!(
                            e.kind(),
                            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                        ) =>
                {
                    attempt += 1;
                    std::thread::sleep(EXPORT_SETTLE_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl OutputAdapter for SysfsOutput {
    fn configure(&self, pin: PinId) -> Result<(), OutputError> {
        self.export(pin)
            .and_then(|()| self.set_direction_out(pin))
            .map_err(|e| OutputError::Configure {
                pin,
                reason: e.to_string(),
            })?;
        lock(&self.configured).insert(pin);
        info!(pin, "GPIO pin configured as output");
        Ok(())
    }

    fn write(&self, pin: PinId, level: PinLevel) -> Result<(), OutputError> {
        let value = match level {
            PinLevel::High => "1",
            PinLevel::Low => "0",
        };
        std::fs::write(self.pin_dir(pin).join("value"), value).map_err(|e| {
            OutputError::Write {
                pin,
                reason: e.to_string(),
            }
        })
    }

    fn release(&self) -> Result<(), OutputError> {
        let pins = std::mem::take(&mut *lock(&self.configured));
        let mut failed = Vec::new();
        for pin in pins {
            if let Err(e) = std::fs::write(self.root.join("unexport"), pin.to_string()) {
                warn!(pin, error = %e, "failed to unexport GPIO pin");
                failed.push(pin);
            }
        }
        if failed.is_empty() {
            info!("GPIO pins released");
            Ok(())
        } else {
            Err(OutputError::Release(format!(
                "could not unexport pins {failed:?}"
            )))
        }
    }

    fn is_hardware(&self) -> bool {
        true
    }
}
