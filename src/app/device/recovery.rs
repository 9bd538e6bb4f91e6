use std::collections::HashSet;
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::Duration;

use tracing::{info, warn};

use crate::app::adb::monitor::StateMonitor;
use crate::app::config::WaitSettings;
use crate::app::device::DeviceController;
use crate::app::error::DeviceError;

/// Brings an unresponsive device back. Failing to do so within the
/// strategy's own bounds is reported as [`DeviceError::NotAvailable`].
pub trait RecoveryStrategy: Send + Sync {
    fn recover_device(&self, serial: &str, monitor: &dyn StateMonitor) -> Result<(), DeviceError>;

    fn recover_device_bootloader(&self, serial: &str, monitor: &dyn StateMonitor) -> Result<(), DeviceError>;
}

/// Waits for the device to come back on its own.
#[derive(Debug, Clone)]
pub struct WaitDeviceRecovery {
    online_timeout: Duration,
    available_timeout: Duration,
    bootloader_timeout: Duration,
}

impl WaitDeviceRecovery {
    pub fn new(online_timeout: Duration, available_timeout: Duration, bootloader_timeout: Duration) -> Self {
        Self {
            online_timeout,
            available_timeout,
            bootloader_timeout,
        }
    }

    pub fn from_settings(settings: &WaitSettings) -> Self {
        Self::new(settings.online(), settings.available(), settings.fastboot())
    }
}

impl RecoveryStrategy for WaitDeviceRecovery {
    fn recover_device(&self, serial: &str, monitor: &dyn StateMonitor) -> Result<(), DeviceError> {
        if !monitor.wait_for_device_online(self.online_timeout) {
            return Err(DeviceError::not_available(serial, "device did not come back online"));
        }
        if !monitor.wait_for_device_available(self.available_timeout) {
            return Err(DeviceError::not_available(serial, "device online but not responsive"));
        }
        Ok(())
    }

    fn recover_device_bootloader(&self, serial: &str, monitor: &dyn StateMonitor) -> Result<(), DeviceError> {
        if monitor.wait_for_device_bootloader(self.bootloader_timeout) {
            return Ok(());
        }
        Err(DeviceError::not_available(serial, "device did not return to bootloader"))
    }
}

/// Marks the current thread as recovering until dropped.
struct RecoveryScope<'a> {
    active: &'a Mutex<HashSet<ThreadId>>,
    thread: ThreadId,
}

impl<'a> RecoveryScope<'a> {
    /// `None` when this thread is already recovering.
    fn enter(active: &'a Mutex<HashSet<ThreadId>>) -> Option<Self> {
        let thread = thread::current().id();
        let inserted = active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(thread);
        inserted.then_some(Self { active, thread })
    }
}

impl Drop for RecoveryScope<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.thread);
    }
}

impl DeviceController {
    /// Recovers the device, then either reboots it (when pre-boot setup has
    /// been lost) or re-applies post-boot setup.
    ///
    /// Device actions run by the setup steps do not recover again: a failure
    /// there ends this recovery with [`DeviceError::NotAvailable`].
    pub fn recover_device(&self) -> Result<(), DeviceError> {
        let serial = self.serial();
        let Some(_scope) = RecoveryScope::enter(&self.recovering) else {
            warn!(serial = %serial, "device still unresponsive while recovering");
            return Err(DeviceError::not_available(
                serial,
                "device still unresponsive while recovering",
            ));
        };
        info!(serial = %serial, "attempting device recovery");
        self.recovery()
            .recover_device(&serial, self.monitor.as_ref())
            .inspect_err(|err| warn!(serial = %serial, error = %err, "device recovery failed"))?;
        info!(serial = %serial, "device recovered");

        if !self.has_preboot_setup_run()? {
            info!(serial = %serial, "pre-boot setup lost; rebooting");
            return self.reboot();
        }
        self.post_boot_setup()
    }

    pub fn recover_device_from_bootloader(&self) -> Result<(), DeviceError> {
        let serial = self.serial();
        info!(serial = %serial, "attempting recovery of device in bootloader");
        self.recovery()
            .recover_device_bootloader(&serial, self.monitor.as_ref())?;
        info!(serial = %serial, "bootloader recovery successful");
        Ok(())
    }
}
