use tracing::{error, warn};

use crate::app::adb::device::RemoteDevice;
use crate::app::device::DeviceController;
use crate::app::error::{DeviceError, TransientError};

impl DeviceController {
    /// Runs `action` against the current connection up to `attempts` times.
    ///
    /// Each failed attempt is followed by a full recovery; recovery failures
    /// end the loop immediately. The connection is re-read before every
    /// attempt, so a swap made during recovery is picked up by the retry.
    pub fn perform_action<T>(
        &self,
        description: &str,
        attempts: u32,
        mut action: impl FnMut(&dyn RemoteDevice) -> Result<T, TransientError>,
    ) -> Result<T, DeviceError> {
        for attempt in 1..=attempts {
            let device = self.remote_device();
            match action(device.as_ref()) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        serial = %device.serial(),
                        action = description,
                        attempt,
                        max_attempts = attempts,
                        kind = %err.kind,
                        error = %err.message,
                        "device action failed; attempting recovery"
                    );
                }
            }
            self.recover_device()?;
        }

        let serial = self.serial();
        error!(serial = %serial, action = description, attempts, "device action exhausted retries");
        Err(DeviceError::unresponsive(serial, description, attempts))
    }

    /// [`perform_action`](Self::perform_action) with the configured attempt count.
    pub fn perform_default<T>(
        &self,
        description: &str,
        action: impl FnMut(&dyn RemoteDevice) -> Result<T, TransientError>,
    ) -> Result<T, DeviceError> {
        self.perform_action(description, self.config.command.max_attempts, action)
    }
}
