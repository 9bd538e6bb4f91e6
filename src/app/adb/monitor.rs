use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::adb::parse::{parse_fastboot_devices, parse_getprop_value};
use crate::app::adb::runner::CommandRunner;
use crate::app::models::DeviceState;

pub const MNT_EXTERNAL_STORAGE: &str = "EXTERNAL_STORAGE";

/// Observes device state transitions. All waits are bounded and return whether
/// the awaited condition was reached.
pub trait StateMonitor: Send + Sync {
    fn wait_for_device_online(&self, timeout: Duration) -> bool;
    fn wait_for_device_available(&self, timeout: Duration) -> bool;
    fn wait_for_device_not_available(&self, timeout: Duration) -> bool;
    fn wait_for_device_bootloader(&self, timeout: Duration) -> bool;
    fn get_mount_point(&self, mount_name: &str) -> Option<String>;
    fn device_state(&self) -> DeviceState;
    fn set_state(&self, state: DeviceState);
}

/// Polls `adb get-state`, boot properties and `fastboot devices`.
pub struct AdbStateMonitor {
    serial: String,
    adb_program: String,
    fastboot_program: String,
    runner: Arc<dyn CommandRunner>,
    poll_interval: Duration,
    query_timeout: Duration,
    state: Mutex<DeviceState>,
    mount_points: Mutex<HashMap<String, String>>,
}

impl AdbStateMonitor {
    pub fn new(
        serial: impl Into<String>,
        adb_program: impl Into<String>,
        fastboot_program: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            serial: serial.into(),
            adb_program: adb_program.into(),
            fastboot_program: fastboot_program.into(),
            runner,
            poll_interval: Duration::from_millis(500),
            query_timeout: Duration::from_secs(10),
            state: Mutex::new(DeviceState::Online),
            mount_points: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(10));
        self
    }

    fn adb(&self, rest: &[&str]) -> Option<String> {
        let mut args = vec!["-s".to_string(), self.serial.clone()];
        args.extend(rest.iter().map(|value| value.to_string()));
        let result = self.runner.run_timed(self.query_timeout, &self.adb_program, &args);
        result.is_success().then_some(result.stdout)
    }

    fn in_fastboot(&self) -> bool {
        let result = self
            .runner
            .run_timed(self.query_timeout, &self.fastboot_program, &["devices".to_string()]);
        parse_fastboot_devices(&result.combined_output()).contains(&self.serial)
    }

    fn query_state(&self) -> DeviceState {
        let state = match self.adb(&["get-state"]) {
            Some(output) => DeviceState::from_adb_state(&output),
            None if self.in_fastboot() => DeviceState::Fastboot,
            None => DeviceState::NotAvailable,
        };
        self.record(state);
        state
    }

    fn record(&self, state: DeviceState) {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *guard != state {
            debug!(serial = %self.serial, from = %*guard, to = %state, "observed state change");
            *guard = state;
        }
    }

    fn is_available(&self) -> bool {
        if self.query_state() != DeviceState::Online {
            return false;
        }
        let booted = self
            .adb(&["shell", "getprop", "sys.boot_completed"])
            .and_then(|output| parse_getprop_value(&output))
            .is_some_and(|value| value == "1");
        if !booted {
            return false;
        }
        self.adb(&["shell", "pm", "path", "android"])
            .is_some_and(|output| output.contains("package:"))
    }

    fn poll_until(&self, timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        loop {
            if condition() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            thread::sleep(self.poll_interval.min(timeout.saturating_sub(start.elapsed())));
        }
    }
}

impl StateMonitor for AdbStateMonitor {
    fn wait_for_device_online(&self, timeout: Duration) -> bool {
        self.poll_until(timeout, || self.query_state() == DeviceState::Online)
    }

    fn wait_for_device_available(&self, timeout: Duration) -> bool {
        self.poll_until(timeout, || self.is_available())
    }

    fn wait_for_device_not_available(&self, timeout: Duration) -> bool {
        self.poll_until(timeout, || self.query_state() != DeviceState::Online)
    }

    fn wait_for_device_bootloader(&self, timeout: Duration) -> bool {
        self.poll_until(timeout, || {
            let found = self.in_fastboot();
            if found {
                self.record(DeviceState::Fastboot);
            }
            found
        })
    }

    fn get_mount_point(&self, mount_name: &str) -> Option<String> {
        if let Some(cached) = self
            .mount_points
            .lock()
            .ok()
            .and_then(|guard| guard.get(mount_name).cloned())
        {
            return Some(cached);
        }
        let output = self.adb(&["shell", "echo", &format!("${mount_name}")])?;
        let value = parse_getprop_value(&output)?;
        if let Ok(mut guard) = self.mount_points.lock() {
            guard.insert(mount_name.to_string(), value.clone());
        } else {
            warn!(serial = %self.serial, "mount point cache unavailable");
        }
        Some(value)
    }

    fn device_state(&self) -> DeviceState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: DeviceState) {
        self.record(state);
    }
}
