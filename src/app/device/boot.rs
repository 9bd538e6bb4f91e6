use std::time::Duration;

use tracing::{error, info, warn};

use crate::app::device::DeviceController;
use crate::app::error::DeviceError;
use crate::app::models::DeviceState;

const ROOT_ALREADY: &str = "adbd is already running as root";
const ROOT_RESTARTING: &str = "restarting adbd as root";

impl DeviceController {
    /// Settings that only take effect before the framework finishes booting.
    pub fn pre_boot_setup(&self) -> Result<(), DeviceError> {
        info!(serial = %self.serial(), "performing pre-boot setup");
        let boot = &self.config.boot;
        if boot.enable_root {
            self.enable_adb_root()?;
        }
        if boot.audio_silent {
            self.execute_shell_command("setprop ro.audio.silent 1")?;
        }
        if boot.set_monkey {
            self.execute_shell_command("setprop ro.monkey 1")?;
        }
        if boot.disable_dialing {
            self.execute_shell_command("setprop ro.telephony.disable-call true")?;
        }
        Ok(())
    }

    /// Re-enables root unconditionally, then checks each configured property.
    pub fn has_preboot_setup_run(&self) -> Result<bool, DeviceError> {
        info!(serial = %self.serial(), "checking pre-boot setup");
        let boot = &self.config.boot;
        if boot.enable_root {
            self.enable_adb_root()?;
        }
        let checks = [
            (boot.audio_silent, "getprop ro.audio.silent", "1"),
            (boot.set_monkey, "getprop ro.monkey", "1"),
            (boot.disable_dialing, "getprop ro.telephony.disable-call", "true"),
        ];
        for (enabled, command, expected) in checks {
            if enabled && !self.execute_shell_command(command)?.contains(expected) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn post_boot_setup(&self) -> Result<(), DeviceError> {
        let boot = &self.config.boot;
        if boot.disable_keyguard {
            info!(serial = %self.serial(), command = %boot.disable_keyguard_cmd, "disabling keyguard");
            self.execute_shell_command(&boot.disable_keyguard_cmd)?;
        }
        Ok(())
    }

    pub fn reboot_into_bootloader(&self) -> Result<(), DeviceError> {
        let serial = self.serial();
        if self.monitor.device_state() == DeviceState::Fastboot {
            info!(serial = %serial, "device already in fastboot; rebooting anyway");
            self.execute_fastboot_command(&["reboot-bootloader"])?;
        } else {
            info!(serial = %serial, "rebooting device into bootloader");
            // A successful bootloader recovery already leaves the device where we want it.
            if let Err(err) = self.remote_device().reboot(Some("bootloader")) {
                warn!(serial = %serial, kind = %err.kind, error = %err.message, "reboot into bootloader failed");
                self.recover_device_from_bootloader()?;
            }
        }
        if !self.monitor.wait_for_device_bootloader(self.config.wait.fastboot()) {
            self.recover_device_from_bootloader()?;
        }
        Ok(())
    }

    /// Reboots and replays both setup phases; falls back to recovery when the
    /// device does not come back in time.
    pub fn reboot(&self) -> Result<(), DeviceError> {
        let serial = self.serial();
        if self.device_state() == DeviceState::Fastboot {
            info!(serial = %serial, "device in fastboot; rebooting to userspace");
            self.execute_fastboot_command(&["reboot"])?;
        } else {
            info!(serial = %serial, "rebooting device");
            self.perform_default("reboot", |device| device.reboot(None))?;
            self.expect_not_available("reboot", self.config.command.timeout());
        }

        if self.monitor.wait_for_device_online(self.config.wait.online()) {
            self.pre_boot_setup()?;
            if self.monitor.wait_for_device_available(self.config.wait.available()) {
                return self.post_boot_setup();
            }
        }
        error!(serial = %serial, "device not available after reboot; setup steps may be skipped");
        self.recover_device()
    }

    pub fn enable_adb_root(&self) -> Result<bool, DeviceError> {
        let serial = self.serial();
        info!(serial = %serial, "adb root");
        let output = self.execute_adb_command(&["root"])?;
        if output.contains(ROOT_ALREADY) {
            return Ok(true);
        }
        if output.contains(ROOT_RESTARTING) {
            self.expect_not_available("root", self.config.wait.root_restart());
            self.wait_for_device_online()?;
            return Ok(true);
        }
        error!(serial = %serial, output = %output.trim(), "unrecognized output from adb root");
        Ok(false)
    }

    pub fn wait_for_device_online(&self) -> Result<(), DeviceError> {
        self.wait_for_device_online_within(self.config.wait.online())
    }

    pub fn wait_for_device_online_within(&self, timeout: Duration) -> Result<(), DeviceError> {
        if self.monitor.wait_for_device_online(timeout) {
            return Ok(());
        }
        self.recover_device()
    }

    pub fn wait_for_device_available(&self) -> Result<(), DeviceError> {
        self.wait_for_device_available_within(self.config.wait.available())
    }

    pub fn wait_for_device_available_within(&self, timeout: Duration) -> Result<(), DeviceError> {
        if self.monitor.wait_for_device_available(timeout) {
            return Ok(());
        }
        self.recover_device()
    }

    pub fn wait_for_device_not_available(&self, timeout: Duration) -> bool {
        self.monitor.wait_for_device_not_available(timeout)
    }

    /// The not-available check races the operation that triggered it, so a
    /// miss is only logged.
    fn expect_not_available(&self, operation: &str, timeout: Duration) {
        if !self.monitor.wait_for_device_not_available(timeout) {
            warn!(serial = %self.serial(), operation, "did not see device become unavailable");
        }
    }
}
