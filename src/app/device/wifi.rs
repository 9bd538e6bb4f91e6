use std::thread;
use std::time::Duration;

use tracing::{error, info};

use crate::app::device::DeviceController;
use crate::app::error::DeviceError;

const DHCP_TIMEOUT: Duration = Duration::from_secs(30);
const PING_ATTEMPTS: usize = 10;
const PING_INTERVAL: Duration = Duration::from_secs(1);
const PING_CMD: &str = "ping -c 1 -w 5 www.google.com";
const PING_SUCCESS: &str = "1 packets transmitted, 1 received";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Completed,
    Scanning,
    Disconnected,
}

/// Drives the device's wifi supplicant.
pub trait WifiHelper {
    fn enable_wifi(&self) -> Result<bool, DeviceError>;
    fn disable_wifi(&self) -> Result<bool, DeviceError>;
    /// Waits until the supplicant reports one of `expected`.
    fn wait_for_wifi_state(&self, expected: &[WifiState]) -> Result<bool, DeviceError>;
    fn add_open_network(&self, ssid: &str) -> Result<Option<u32>, DeviceError>;
    fn associate_network(&self, network_id: u32) -> Result<bool, DeviceError>;
    fn wait_for_dhcp(&self, timeout: Duration) -> Result<bool, DeviceError>;
    fn remove_all_networks(&self) -> Result<bool, DeviceError>;
}

impl DeviceController {
    pub fn connect_to_wifi_network(&self, wifi: &dyn WifiHelper, ssid: &str) -> Result<bool, DeviceError> {
        let serial = self.serial();
        info!(serial = %serial, ssid, "connecting to wifi network");
        wifi.enable_wifi()?;
        wifi.wait_for_wifi_state(&[WifiState::Scanning, WifiState::Completed])?;

        let Some(network_id) = wifi.add_open_network(ssid)? else {
            error!(serial = %serial, ssid, "failed to add wifi network");
            return Ok(false);
        };
        if !wifi.associate_network(network_id)? {
            error!(serial = %serial, ssid, "failed to enable wifi network");
            return Ok(false);
        }
        if !wifi.wait_for_wifi_state(&[WifiState::Completed])? {
            error!(serial = %serial, ssid, "wifi network failed to associate");
            return Ok(false);
        }
        if !wifi.wait_for_dhcp(DHCP_TIMEOUT)? {
            error!(serial = %serial, ssid, "dhcp timeout");
            return Ok(false);
        }

        for attempt in 1..=PING_ATTEMPTS {
            if self.execute_shell_command(PING_CMD)?.contains(PING_SUCCESS) {
                return Ok(true);
            }
            if attempt < PING_ATTEMPTS {
                thread::sleep(PING_INTERVAL);
            }
        }
        error!(serial = %serial, ssid, "ping unsuccessful after connecting");
        Ok(false)
    }

    pub fn disconnect_from_wifi(&self, wifi: &dyn WifiHelper) -> Result<bool, DeviceError> {
        wifi.remove_all_networks()?;
        wifi.disable_wifi()?;
        Ok(true)
    }
}
