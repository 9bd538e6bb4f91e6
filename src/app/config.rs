use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::adb::locator::{resolve_adb_program, resolve_fastboot_program};
use crate::app::error::DeviceError;

pub const CONFIG_PATH_ENV: &str = "LAZY_BLACKTEA_DEVICE_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolSettings {
    pub adb_path: String,
    pub fastboot_path: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            fastboot_path: "fastboot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandSettings {
    pub timeout_ms: u64,
    pub long_timeout_ms: u64,
    pub max_attempts: u32,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 2 * 60 * 1000,
            long_timeout_ms: 12 * 60 * 1000,
            max_attempts: 3,
        }
    }
}

impl CommandSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn long_timeout(&self) -> Duration {
        Duration::from_millis(self.long_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootSettings {
    pub enable_root: bool,
    pub audio_silent: bool,
    pub set_monkey: bool,
    pub disable_dialing: bool,
    pub disable_keyguard: bool,
    pub disable_keyguard_cmd: String,
}

impl Default for BootSettings {
    fn default() -> Self {
        Self {
            enable_root: true,
            audio_silent: true,
            set_monkey: true,
            disable_dialing: true,
            disable_keyguard: true,
            disable_keyguard_cmd: "input keyevent 82".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogcatSettings {
    /// Bytes per buffer file; up to twice this is retained.
    pub max_tmp_file_size: u64,
    pub start_delay_ms: u64,
    pub reconnect_settle_ms: u64,
    pub reconnect_wait_ms: u64,
}

impl Default for LogcatSettings {
    fn default() -> Self {
        Self {
            max_tmp_file_size: 10 * 1024 * 1024,
            start_delay_ms: 5 * 1000,
            reconnect_settle_ms: 5 * 1000,
            reconnect_wait_ms: 10 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WaitSettings {
    pub online_timeout_ms: u64,
    pub available_timeout_ms: u64,
    pub fastboot_timeout_ms: u64,
    pub root_restart_timeout_ms: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            online_timeout_ms: 60 * 1000,
            available_timeout_ms: 6 * 60 * 1000,
            fastboot_timeout_ms: 60 * 1000,
            root_restart_timeout_ms: 30 * 1000,
        }
    }
}

impl WaitSettings {
    pub fn online(&self) -> Duration {
        Duration::from_millis(self.online_timeout_ms)
    }

    pub fn available(&self) -> Duration {
        Duration::from_millis(self.available_timeout_ms)
    }

    pub fn fastboot(&self) -> Duration {
        Duration::from_millis(self.fastboot_timeout_ms)
    }

    pub fn root_restart(&self) -> Duration {
        Duration::from_millis(self.root_restart_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub command: CommandSettings,
    #[serde(default)]
    pub boot: BootSettings,
    #[serde(default)]
    pub logcat: LogcatSettings,
    #[serde(default)]
    pub wait: WaitSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lazy_blacktea_device.json")
}

pub fn backup_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lazy_blacktea_device.backup.json")
}

pub fn load_config() -> Result<DeviceConfig, DeviceError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &DeviceConfig) -> Result<(), DeviceError> {
    save_config_to_path(config, &config_path(), &backup_config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<DeviceConfig, DeviceError> {
    if !path.exists() {
        return Ok(validate_config(DeviceConfig::default()));
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| DeviceError::system(format!("Failed to read config: {err}")))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| DeviceError::system(format!("Failed to parse config: {err}")))?;
    let mut config: DeviceConfig = serde_json::from_value(value.clone()).unwrap_or_default();
    config = apply_option_overrides(config, &value);
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &DeviceConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), DeviceError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| DeviceError::system(format!("Failed to serialize config: {err}")))?;
    fs::write(path, payload)
        .map_err(|err| DeviceError::system(format!("Failed to write config: {err}")))?;
    Ok(())
}

// Flat option-style keys as accepted on the command line of older harnesses.
fn apply_option_overrides(mut config: DeviceConfig, value: &serde_json::Value) -> DeviceConfig {
    let flag = |key: &str| value.get(key).and_then(|v| v.as_bool());
    if let Some(enabled) = flag("enable-root") {
        config.boot.enable_root = enabled;
    }
    if let Some(enabled) = flag("disable-dialing") {
        config.boot.disable_dialing = enabled;
    }
    if let Some(enabled) = flag("set-monkey") {
        config.boot.set_monkey = enabled;
    }
    if let Some(enabled) = flag("audio-silent") {
        config.boot.audio_silent = enabled;
    }
    if let Some(enabled) = flag("disable-keyguard") {
        config.boot.disable_keyguard = enabled;
    }
    if let Some(cmd) = value.get("disable-keyguard-cmd").and_then(|v| v.as_str()) {
        config.boot.disable_keyguard_cmd = cmd.to_string();
    }
    if let Some(size) = value.get("max-tmp-logcat-file").and_then(|v| v.as_u64()) {
        config.logcat.max_tmp_file_size = size;
    }
    config
}

fn validate_config(mut config: DeviceConfig) -> DeviceConfig {
    config.tools.adb_path = resolve_adb_program(&config.tools.adb_path);
    config.tools.fastboot_path = resolve_fastboot_program(&config.tools.fastboot_path);
    let defaults = DeviceConfig::default();
    if config.command.timeout_ms == 0 {
        config.command.timeout_ms = defaults.command.timeout_ms;
    }
    if config.command.long_timeout_ms < config.command.timeout_ms {
        config.command.long_timeout_ms = defaults.command.long_timeout_ms.max(config.command.timeout_ms);
    }
    if config.command.max_attempts == 0 {
        config.command.max_attempts = defaults.command.max_attempts;
    }
    if config.logcat.max_tmp_file_size < 1024 {
        config.logcat.max_tmp_file_size = defaults.logcat.max_tmp_file_size;
    }
    if config.wait.fastboot_timeout_ms == 0 {
        config.wait.fastboot_timeout_ms = defaults.wait.fastboot_timeout_ms;
    }
    if config.boot.disable_keyguard_cmd.trim().is_empty() {
        config.boot.disable_keyguard_cmd = defaults.boot.disable_keyguard_cmd;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_option_style_keys() {
        let value = serde_json::json!({
            "enable-root": false,
            "set-monkey": false,
            "disable-keyguard-cmd": "wm dismiss-keyguard",
            "max-tmp-logcat-file": 4096,
            "command": { "timeout_ms": 5000, "long_timeout_ms": 60000, "max_attempts": 5 }
        });
        let mut config: DeviceConfig = serde_json::from_value(value.clone()).unwrap_or_default();
        config = apply_option_overrides(config, &value);
        assert!(!config.boot.enable_root);
        assert!(!config.boot.set_monkey);
        assert!(config.boot.audio_silent);
        assert_eq!(config.boot.disable_keyguard_cmd, "wm dismiss-keyguard");
        assert_eq!(config.logcat.max_tmp_file_size, 4096);
        assert_eq!(config.command.max_attempts, 5);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: DeviceConfig =
            serde_json::from_value(serde_json::json!({ "wait": { "fastboot_timeout_ms": 1000 } }))
                .expect("parse");
        assert_eq!(config.wait.fastboot(), Duration::from_secs(1));
        assert_eq!(config.wait.online(), Duration::from_secs(60));
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = DeviceConfig::default();
        config.command.timeout_ms = 0;
        config.command.max_attempts = 0;
        config.logcat.max_tmp_file_size = 10;
        config.boot.disable_keyguard_cmd = "  ".to_string();
        config.tools.adb_path = " \"/opt/platform-tools/adb\" ".to_string();
        let validated = validate_config(config);
        assert_eq!(validated.command.timeout_ms, 120_000);
        assert_eq!(validated.command.max_attempts, 3);
        assert_eq!(validated.logcat.max_tmp_file_size, 10 * 1024 * 1024);
        assert_eq!(validated.boot.disable_keyguard_cmd, "input keyevent 82");
        assert_eq!(validated.tools.adb_path, "/opt/platform-tools/adb");
    }

    #[test]
    fn round_trips_through_disk_with_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.backup.json");

        let missing = load_config_from_path(&path).expect("defaults");
        assert_eq!(missing, validate_config(DeviceConfig::default()));

        let mut config = DeviceConfig::default();
        config.logcat.start_delay_ms = 0;
        save_config_to_path(&config, &path, &backup).expect("save");
        save_config_to_path(&config, &path, &backup).expect("save again");
        assert!(backup.exists());

        let loaded = load_config_from_path(&path).expect("load");
        assert_eq!(loaded.logcat.start_delay_ms, 0);
    }
}
