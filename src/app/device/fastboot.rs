use std::time::Duration;

use tracing::{debug, warn};

use crate::app::device::DeviceController;
use crate::app::error::DeviceError;
use crate::app::models::{CommandResult, CommandStatus};

impl DeviceController {
    pub fn execute_fastboot_command(&self, args: &[&str]) -> Result<CommandResult, DeviceError> {
        self.do_fastboot_command(self.config.command.timeout(), args)
    }

    /// For flashing and other commands that outlast the normal timeout.
    pub fn execute_long_fastboot_command(&self, args: &[&str]) -> Result<CommandResult, DeviceError> {
        self.do_fastboot_command(self.config.command.long_timeout(), args)
    }

    /// Only timeouts are retried; any other status is handed back to the caller.
    fn do_fastboot_command(&self, timeout: Duration, args: &[&str]) -> Result<CommandResult, DeviceError> {
        let serial = self.serial();
        let mut full_args = vec!["-s".to_string(), serial.clone()];
        full_args.extend(args.iter().map(|value| value.to_string()));
        let description = format!("fastboot {}", args.first().copied().unwrap_or_default());
        let attempts = self.config.command.max_attempts;

        for attempt in 1..=attempts {
            let result = {
                let _permit = self.fastboot_lock.acquire();
                self.runner
                    .run_timed(timeout, &self.config.tools.fastboot_path, &full_args)
            };
            if result.status != CommandStatus::TimedOut {
                debug!(serial = %serial, command = %description, status = ?result.status, "fastboot command finished");
                return Ok(result);
            }
            warn!(serial = %serial, command = %description, attempt, max_attempts = attempts, "fastboot command timed out");
            self.recover_device_from_bootloader()?;
        }

        Err(DeviceError::unresponsive(serial, description, attempts))
    }
}
