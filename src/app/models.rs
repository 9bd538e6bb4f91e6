use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse connection state of the controlled device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    #[default]
    Online,
    Offline,
    Fastboot,
    Recovery,
    NotAvailable,
}

impl DeviceState {
    /// Maps `adb get-state` / `adb devices` state tokens.
    pub fn from_adb_state(value: &str) -> DeviceState {
        match value.trim() {
            "device" => DeviceState::Online,
            "recovery" | "sideload" => DeviceState::Recovery,
            "bootloader" | "fastboot" => DeviceState::Fastboot,
            "offline" | "unauthorized" | "authorizing" | "connecting" => DeviceState::Offline,
            _ => DeviceState::NotAvailable,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceState::Online => "ONLINE",
            DeviceState::Offline => "OFFLINE",
            DeviceState::Fastboot => "FASTBOOT",
            DeviceState::Recovery => "RECOVERY",
            DeviceState::NotAvailable => "NOT_AVAILABLE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Success,
    Failed,
    Exception,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Success,
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn with_status(status: CommandStatus, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    /// Some tools (fastboot) print to stderr only.
    pub fn combined_output(&self) -> String {
        if self.stdout.trim().is_empty() {
            self.stderr.clone()
        } else if self.stderr.trim().is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// One row of a remote directory listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size_bytes: Option<u64>,
    /// `YYYY-MM-DD` as reported by the device, in UTC.
    pub date: String,
    /// `HH:MM` as reported by the device, in UTC.
    pub time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_adb_state_tokens() {
        assert_eq!(DeviceState::from_adb_state("device\n"), DeviceState::Online);
        assert_eq!(DeviceState::from_adb_state("bootloader"), DeviceState::Fastboot);
        assert_eq!(DeviceState::from_adb_state("recovery"), DeviceState::Recovery);
        assert_eq!(DeviceState::from_adb_state("offline"), DeviceState::Offline);
        assert_eq!(DeviceState::from_adb_state("error: device not found"), DeviceState::NotAvailable);
    }

    #[test]
    fn combined_output_prefers_non_empty_stream() {
        let result = CommandResult::with_status(CommandStatus::Success, "", "product: walleye");
        assert_eq!(result.combined_output(), "product: walleye");
        assert_eq!(DeviceState::NotAvailable.to_string(), "NOT_AVAILABLE");
    }
}
