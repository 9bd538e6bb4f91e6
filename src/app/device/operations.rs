use std::path::Path;

use tracing::{error, info, trace, warn};

use crate::app::adb::device::{CollectingReceiver, ShellOutputReceiver};
use crate::app::adb::monitor::MNT_EXTERNAL_STORAGE;
use crate::app::adb::parse::{
    count_error_dialogs, parse_df_available_kb, parse_fastboot_product, parse_getprop_value,
};
use crate::app::adb::paths::shell_quote;
use crate::app::adb::transfer::classify_command;
use crate::app::device::DeviceController;
use crate::app::error::DeviceError;
use crate::app::models::DeviceState;

const NUM_CLEAR_ATTEMPTS: usize = 5;
const DISMISS_DIALOG_CMD: &str = "input keyevent 23";
const PRODUCT_PROPERTY: &str = "ro.product.board";

impl DeviceController {
    pub fn get_product_type(&self) -> Result<Option<String>, DeviceError> {
        if let Some(product) = self.remote_device().get_property(PRODUCT_PROPERTY) {
            return Ok(Some(product));
        }
        let serial = self.serial();
        if self.device_state() == DeviceState::Fastboot {
            warn!(serial = %serial, "product type unknown; querying fastboot");
            return self.get_fastboot_product();
        }
        warn!(serial = %serial, "product type unknown; querying getprop");
        let output = self.execute_shell_command(&format!("getprop {PRODUCT_PROPERTY}"))?;
        Ok(parse_getprop_value(&output))
    }

    fn get_fastboot_product(&self) -> Result<Option<String>, DeviceError> {
        let result = self.execute_fastboot_command(&["getvar", "product"])?;
        if !result.is_success() {
            return Ok(None);
        }
        // fastboot may report on stderr instead of stdout
        let text = if result.stdout.trim().is_empty() {
            &result.stderr
        } else {
            &result.stdout
        };
        Ok(parse_fastboot_product(text))
    }

    pub fn execute_shell_command_with_receiver(
        &self,
        command: &str,
        receiver: &mut dyn ShellOutputReceiver,
    ) -> Result<(), DeviceError> {
        let timeout = self.config.command.timeout();
        self.perform_default(&format!("shell {command}"), |device| {
            device.execute_shell(command, &mut *receiver, Some(timeout))
        })
    }

    pub fn execute_shell_command(&self, command: &str) -> Result<String, DeviceError> {
        let mut receiver = CollectingReceiver::new();
        self.execute_shell_command_with_receiver(command, &mut receiver)?;
        let output = receiver.output();
        trace!(serial = %self.serial(), command, output = %output, "shell command output");
        Ok(output)
    }

    /// Host-side `adb -s <serial> <args>` through the command runner.
    /// Returns stdout and stderr together; adb reports some outcomes on stderr.
    pub fn execute_adb_command(&self, args: &[&str]) -> Result<String, DeviceError> {
        let mut full_args = vec!["-s".to_string(), self.serial()];
        full_args.extend(args.iter().map(|value| value.to_string()));
        let description = format!("adb {}", args.first().copied().unwrap_or_default());
        let timeout = self.config.command.timeout();
        let program = self.config.tools.adb_path.as_str();
        self.perform_default(&description, |_device| {
            let result = self.runner.run_timed(timeout, program, &full_args);
            classify_command(&result)?;
            Ok(result.combined_output())
        })
    }

    /// Returns the installer's failure reason, or `None` on success.
    pub fn install_package(&self, package: &Path, reinstall: bool) -> Result<Option<String>, DeviceError> {
        self.perform_default(&format!("install {}", package.display()), |device| {
            device.install_package(package, reinstall)
        })
    }

    pub fn uninstall_package(&self, package_name: &str) -> Result<Option<String>, DeviceError> {
        self.perform_default(&format!("uninstall {package_name}"), |device| {
            device.uninstall_package(package_name)
        })
    }

    pub fn pull_file(&self, remote: &str, local: &Path) -> Result<bool, DeviceError> {
        self.perform_default(&format!("pull {remote} to {}", local.display()), |device| {
            device.pull_file(remote, local).map(|()| true)
        })
    }

    pub fn push_file(&self, local: &Path, remote: &str) -> Result<bool, DeviceError> {
        self.perform_default(&format!("push {} to {remote}", local.display()), |device| {
            device.push_file(local, remote).map(|()| true)
        })
    }

    pub fn does_file_exist(&self, device_path: &str) -> Result<bool, DeviceError> {
        let output = self.execute_shell_command(&format!("ls {}", shell_quote(device_path)))?;
        Ok(!output.contains("No such file or directory"))
    }

    /// Free space in KiB on external storage; 0 when it cannot be determined.
    pub fn get_external_store_free_space(&self) -> Result<u64, DeviceError> {
        let serial = self.serial();
        info!(serial = %serial, "checking free space");
        let Some(mount_point) = self.get_mount_point(MNT_EXTERNAL_STORAGE) else {
            error!(serial = %serial, "external storage mount point unknown");
            return Ok(0);
        };
        let output = self.execute_shell_command(&format!("df {}", shell_quote(&mount_point)))?;
        match parse_df_available_kb(&output) {
            Some(available) => Ok(available),
            None => {
                error!(serial = %serial, output = %output.trim(), "free space output did not match expected pattern");
                Ok(0)
            }
        }
    }

    pub fn get_mount_point(&self, mount_name: &str) -> Option<String> {
        self.monitor.get_mount_point(mount_name)
    }

    /// Dismisses crash and ANR dialogs; `false` when some keep reappearing.
    pub fn clear_error_dialogs(&self) -> Result<bool, DeviceError> {
        let serial = self.serial();
        for _ in 0..NUM_CLEAR_ATTEMPTS {
            let count = self.error_dialog_count()?;
            if count == 0 {
                return Ok(true);
            }
            info!(serial = %serial, count, "clearing error dialogs");
            for _ in 0..count {
                self.execute_shell_command(DISMISS_DIALOG_CMD)?;
            }
        }
        if self.error_dialog_count()? > 0 {
            error!(serial = %serial, "error dialogs still present");
            return Ok(false);
        }
        Ok(true)
    }

    fn error_dialog_count(&self) -> Result<usize, DeviceError> {
        let output = self.execute_shell_command("dumpsys activity processes")?;
        Ok(count_error_dialogs(&output))
    }
}
