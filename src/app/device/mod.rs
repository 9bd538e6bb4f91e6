//! Host-side controller for one device: every operation goes through the
//! retry/recovery executor in [`action`], and the live connection can be
//! swapped underneath running work through [`handle::DeviceHandle`].

pub mod action;
pub mod boot;
pub mod fastboot;
pub mod fastboot_lock;
pub mod handle;
pub mod logcat;
pub mod operations;
pub mod recovery;
pub mod state;
pub mod sync;
pub mod wifi;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::ThreadId;

use tracing::debug;

use crate::app::adb::device::{AdbDevice, RemoteDevice};
use crate::app::adb::monitor::{AdbStateMonitor, StateMonitor};
use crate::app::adb::runner::{CommandRunner, ProcessRunner};
use crate::app::config::DeviceConfig;
use crate::app::device::fastboot_lock::FastbootLock;
use crate::app::device::handle::DeviceHandle;
use crate::app::device::logcat::LogcatCapture;
use crate::app::device::recovery::{RecoveryStrategy, WaitDeviceRecovery};
use crate::app::device::state::{DeviceStateTracker, StateChange};
use crate::app::models::DeviceState;

pub struct DeviceController {
    handle: Arc<DeviceHandle>,
    recovery: RwLock<Arc<dyn RecoveryStrategy>>,
    monitor: Arc<dyn StateMonitor>,
    runner: Arc<dyn CommandRunner>,
    config: DeviceConfig,
    state: DeviceStateTracker,
    fastboot_lock: Arc<FastbootLock>,
    logcat: Mutex<Option<LogcatCapture>>,
    /// Threads currently inside `recover_device`.
    recovering: Mutex<HashSet<ThreadId>>,
}

impl DeviceController {
    pub fn new(
        device: Arc<dyn RemoteDevice>,
        monitor: Arc<dyn StateMonitor>,
        runner: Arc<dyn CommandRunner>,
        config: DeviceConfig,
    ) -> Self {
        let fastboot_lock = Arc::new(FastbootLock::new());
        let recovery: Arc<dyn RecoveryStrategy> = Arc::new(WaitDeviceRecovery::from_settings(&config.wait));
        Self {
            handle: Arc::new(DeviceHandle::new(device)),
            recovery: RwLock::new(recovery),
            state: DeviceStateTracker::new(monitor.device_state(), Arc::clone(&fastboot_lock)),
            monitor,
            runner,
            config,
            fastboot_lock,
            logcat: Mutex::new(None),
            recovering: Mutex::new(HashSet::new()),
        }
    }

    /// Wires the process-backed adb/fastboot transport for `serial`.
    pub fn connect(serial: &str, config: DeviceConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let device = Arc::new(AdbDevice::new(
            serial,
            config.tools.adb_path.clone(),
            Arc::clone(&runner),
            config.command.timeout(),
            config.command.long_timeout(),
        ));
        let monitor = Arc::new(AdbStateMonitor::new(
            serial,
            config.tools.adb_path.clone(),
            config.tools.fastboot_path.clone(),
            Arc::clone(&runner),
        ));
        Self::new(device, monitor, runner, config)
    }

    pub fn serial(&self) -> String {
        self.handle.serial()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<dyn StateMonitor> {
        &self.monitor
    }

    pub fn remote_device(&self) -> Arc<dyn RemoteDevice> {
        self.handle.get()
    }

    pub fn set_remote_device(&self, device: Arc<dyn RemoteDevice>) {
        let serial = device.serial().to_string();
        if self.handle.replace(device) {
            debug!(serial = %serial, generation = self.handle.generation(), "device connection replaced");
        }
    }

    pub fn set_recovery(&self, strategy: Arc<dyn RecoveryStrategy>) {
        let mut guard = self.recovery.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = strategy;
    }

    pub(crate) fn recovery(&self) -> Arc<dyn RecoveryStrategy> {
        let guard = self.recovery.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn device_state(&self) -> DeviceState {
        self.state.current()
    }

    /// Applies a state reported by the device tracker. Changes into or out of
    /// FASTBOOT are dropped while a bootloader command holds the lock.
    pub fn set_device_state(&self, requested: DeviceState) {
        match self.state.request(requested) {
            StateChange::Unchanged => {}
            StateChange::Applied { from, to } => {
                debug!(serial = %self.serial(), from = %from, to = %to, "device state changed");
                self.monitor.set_state(to);
            }
            StateChange::Dropped => {
                debug!(
                    serial = %self.serial(),
                    requested = %requested,
                    "fastboot command in flight; ignoring state change"
                );
            }
        }
    }
}
