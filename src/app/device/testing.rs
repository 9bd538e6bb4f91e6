use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::app::adb::device::{AdbDevice, RemoteDevice, ShellOutputReceiver};
use crate::app::adb::monitor::StateMonitor;
use crate::app::adb::runner::CommandRunner;
use crate::app::config::DeviceConfig;
use crate::app::device::logcat::LOGCAT_CMD;
use crate::app::device::recovery::RecoveryStrategy;
use crate::app::device::DeviceController;
use crate::app::error::{DeviceError, TransientError};
use crate::app::models::{CommandResult, CommandStatus, DeviceState, RemoteFileEntry};

pub(crate) const OP_LIST_DIR: &str = "list_dir";
pub(crate) const OP_PUSH_FILES: &str = "push_files";
pub(crate) const OP_INSTALL: &str = "install_package";

fn listing_key(dir: &str) -> String {
    match dir.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Scriptable in-memory device. Failures are keyed by shell command or by
/// operation name and consumed one per call.
#[derive(Default)]
pub(crate) struct FakeDevice {
    serial: String,
    pub shell_outputs: Mutex<HashMap<String, String>>,
    pub failures: Mutex<HashMap<String, u32>>,
    pub shell_log: Mutex<Vec<String>>,
    pub listings: Mutex<HashMap<String, Vec<RemoteFileEntry>>>,
    pub pushes: Mutex<Vec<(Vec<PathBuf>, String)>>,
    pub pulls: Mutex<Vec<(String, PathBuf)>>,
    pub installs: Mutex<Vec<(PathBuf, bool)>>,
    pub properties: Mutex<HashMap<String, String>>,
    pub reboots: Mutex<Vec<Option<String>>>,
    pub logcat_chunks: Mutex<Vec<String>>,
    pub logcat_failures: AtomicU32,
    pub logcat_starts: AtomicU32,
}

impl FakeDevice {
    pub fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            ..Default::default()
        }
    }

    pub fn respond(&self, command: &str, output: &str) {
        self.shell_outputs
            .lock()
            .expect("outputs")
            .insert(command.to_string(), output.to_string());
    }

    pub fn fail(&self, key: &str, times: u32) {
        self.failures.lock().expect("failures").insert(key.to_string(), times);
    }

    pub fn list(&self, dir: &str, entries: Vec<RemoteFileEntry>) {
        self.listings
            .lock()
            .expect("listings")
            .insert(listing_key(dir), entries);
    }

    pub fn shell_count(&self, command: &str) -> usize {
        self.shell_log
            .lock()
            .expect("log")
            .iter()
            .filter(|logged| logged.as_str() == command)
            .count()
    }

    fn take_failure(&self, key: &str) -> bool {
        let mut failures = self.failures.lock().expect("failures");
        match failures.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn stream_logcat(&self, receiver: &mut dyn ShellOutputReceiver) -> Result<(), TransientError> {
        self.logcat_starts.fetch_add(1, Ordering::SeqCst);
        let chunks = self.logcat_chunks.lock().expect("chunks").clone();
        for chunk in chunks {
            receiver.add_output(chunk.as_bytes());
        }
        let failing = self
            .logcat_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransientError::io("device offline"));
        }
        while !receiver.is_cancelled() {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

impl RemoteDevice for FakeDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn execute_shell(
        &self,
        command: &str,
        receiver: &mut dyn ShellOutputReceiver,
        _timeout: Option<Duration>,
    ) -> Result<(), TransientError> {
        self.shell_log.lock().expect("log").push(command.to_string());
        if command == LOGCAT_CMD {
            return self.stream_logcat(receiver);
        }
        if self.take_failure(command) {
            return Err(TransientError::io(format!("{} dropped connection", self.serial)));
        }
        if let Some(output) = self.shell_outputs.lock().expect("outputs").get(command) {
            receiver.add_output(output.as_bytes());
        }
        Ok(())
    }

    fn push_file(&self, local: &Path, remote: &str) -> Result<(), TransientError> {
        self.pushes
            .lock()
            .expect("pushes")
            .push((vec![local.to_path_buf()], remote.to_string()));
        Ok(())
    }

    fn pull_file(&self, remote: &str, local: &Path) -> Result<(), TransientError> {
        self.pulls
            .lock()
            .expect("pulls")
            .push((remote.to_string(), local.to_path_buf()));
        Ok(())
    }

    fn push_files(&self, locals: &[PathBuf], remote_dir: &str) -> Result<(), TransientError> {
        if self.take_failure(OP_PUSH_FILES) {
            return Err(TransientError::sync("transfer interrupted"));
        }
        self.pushes
            .lock()
            .expect("pushes")
            .push((locals.to_vec(), remote_dir.to_string()));
        Ok(())
    }

    fn list_dir(&self, remote_dir: &str) -> Result<Vec<RemoteFileEntry>, TransientError> {
        if self.take_failure(OP_LIST_DIR) {
            return Err(TransientError::timeout("ls timed out"));
        }
        Ok(self
            .listings
            .lock()
            .expect("listings")
            .get(&listing_key(remote_dir))
            .cloned()
            .unwrap_or_default())
    }

    fn reboot(&self, into: Option<&str>) -> Result<(), TransientError> {
        self.reboots.lock().expect("reboots").push(into.map(str::to_string));
        Ok(())
    }

    fn install_package(&self, package: &Path, reinstall: bool) -> Result<Option<String>, TransientError> {
        if self.take_failure(OP_INSTALL) {
            return Err(TransientError::install("no package manager verdict"));
        }
        self.installs
            .lock()
            .expect("installs")
            .push((package.to_path_buf(), reinstall));
        Ok(None)
    }

    fn uninstall_package(&self, _package_name: &str) -> Result<Option<String>, TransientError> {
        Ok(None)
    }

    fn get_property(&self, key: &str) -> Option<String> {
        self.properties.lock().expect("properties").get(key).cloned()
    }
}

/// Monitor whose answers are flipped by the test.
pub(crate) struct FakeMonitor {
    online: AtomicBool,
    available: AtomicBool,
    bootloader: AtomicBool,
    pub online_waits: AtomicU32,
    state: Mutex<DeviceState>,
    pub reported_states: Mutex<Vec<DeviceState>>,
}

impl FakeMonitor {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            available: AtomicBool::new(true),
            bootloader: AtomicBool::new(false),
            online_waits: AtomicU32::new(0),
            state: Mutex::new(DeviceState::Online),
            reported_states: Mutex::new(Vec::new()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_bootloader(&self, bootloader: bool) {
        self.bootloader.store(bootloader, Ordering::SeqCst);
    }

    fn wait_for(flag: &AtomicBool, timeout: Duration) -> bool {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        thread::sleep(timeout.min(Duration::from_millis(5)));
        flag.load(Ordering::SeqCst)
    }
}

impl StateMonitor for FakeMonitor {
    fn wait_for_device_online(&self, timeout: Duration) -> bool {
        self.online_waits.fetch_add(1, Ordering::SeqCst);
        Self::wait_for(&self.online, timeout)
    }

    fn wait_for_device_available(&self, timeout: Duration) -> bool {
        Self::wait_for(&self.available, timeout)
    }

    fn wait_for_device_not_available(&self, _timeout: Duration) -> bool {
        true
    }

    fn wait_for_device_bootloader(&self, timeout: Duration) -> bool {
        Self::wait_for(&self.bootloader, timeout)
    }

    fn get_mount_point(&self, _mount_name: &str) -> Option<String> {
        Some("/sdcard".to_string())
    }

    fn device_state(&self) -> DeviceState {
        *self.state.lock().expect("state")
    }

    fn set_state(&self, state: DeviceState) {
        *self.state.lock().expect("state") = state;
        self.reported_states.lock().expect("reported").push(state);
    }
}

type RecoveryHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct FakeRecovery {
    pub recoveries: AtomicU32,
    pub bootloader_recoveries: AtomicU32,
    pub fail: AtomicBool,
    pub on_recover: Mutex<Option<RecoveryHook>>,
}

impl RecoveryStrategy for FakeRecovery {
    fn recover_device(&self, serial: &str, _monitor: &dyn StateMonitor) -> Result<(), DeviceError> {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_recover.lock().expect("hook").as_ref() {
            hook();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeviceError::not_available(serial, "gone"));
        }
        Ok(())
    }

    fn recover_device_bootloader(&self, serial: &str, _monitor: &dyn StateMonitor) -> Result<(), DeviceError> {
        self.bootloader_recoveries.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeviceError::not_available(serial, "gone"));
        }
        Ok(())
    }
}

/// Host command runner answering from a queue, then with `default`.
pub(crate) struct FakeRunner {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
    pub queued: Mutex<VecDeque<CommandResult>>,
    pub default: CommandResult,
    pub hold: Duration,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            queued: Mutex::new(VecDeque::new()),
            default: CommandResult::success("adbd is already running as root\n"),
            hold: Duration::ZERO,
        }
    }

    pub fn queue(&self, result: CommandResult) {
        self.queued.lock().expect("queued").push_back(result);
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .filter(|(called, _)| called == program)
            .count()
    }
}

impl CommandRunner for FakeRunner {
    fn run_timed(&self, _timeout: Duration, program: &str, args: &[String]) -> CommandResult {
        self.calls
            .lock()
            .expect("calls")
            .push((program.to_string(), args.to_vec()));
        if !self.hold.is_zero() {
            thread::sleep(self.hold);
        }
        self.queued
            .lock()
            .expect("queued")
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }

    fn run_streaming(
        &self,
        timeout: Option<Duration>,
        program: &str,
        args: &[String],
        _on_output: &mut dyn FnMut(&[u8]) -> bool,
    ) -> CommandResult {
        self.run_timed(timeout.unwrap_or_default(), program, args)
    }
}

/// Answers `adb -s <serial> <args>` by the args after the serial, reporting
/// like the process runner: streamed stdout goes to the callback, stderr and
/// status stay on the result. Unscripted commands succeed silently.
#[derive(Default)]
pub(crate) struct AdbScriptRunner {
    answers: Mutex<HashMap<String, CommandResult>>,
    pub calls: Mutex<Vec<String>>,
}

impl AdbScriptRunner {
    pub fn answer(&self, args: &str, status: CommandStatus, stdout: &str, stderr: &str) {
        self.answers
            .lock()
            .expect("answers")
            .insert(args.to_string(), CommandResult::with_status(status, stdout, stderr));
    }

    pub fn call_count(&self, args: &str) -> usize {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .filter(|called| called.as_str() == args)
            .count()
    }

    fn lookup(&self, args: &[String]) -> CommandResult {
        let key = args.get(2..).unwrap_or_default().join(" ");
        self.calls.lock().expect("calls").push(key.clone());
        self.answers
            .lock()
            .expect("answers")
            .get(&key)
            .cloned()
            .unwrap_or_else(|| CommandResult::success(""))
    }
}

impl CommandRunner for AdbScriptRunner {
    fn run_timed(&self, _timeout: Duration, _program: &str, args: &[String]) -> CommandResult {
        self.lookup(args)
    }

    fn run_streaming(
        &self,
        _timeout: Option<Duration>,
        _program: &str,
        args: &[String],
        on_output: &mut dyn FnMut(&[u8]) -> bool,
    ) -> CommandResult {
        let mut result = self.lookup(args);
        let stdout = std::mem::take(&mut result.stdout);
        if !stdout.is_empty() {
            on_output(stdout.as_bytes());
        }
        if result.status == CommandStatus::Success {
            result.exit_code = Some(0);
        }
        result
    }
}

pub(crate) struct AdbHarness {
    pub controller: Arc<DeviceController>,
    pub runner: Arc<AdbScriptRunner>,
    pub recovery: Arc<FakeRecovery>,
}

/// Controller over the real adb transport with a scripted runner underneath.
pub(crate) fn adb_harness(config: DeviceConfig) -> AdbHarness {
    let runner = Arc::new(AdbScriptRunner::default());
    let device = Arc::new(AdbDevice::new(
        "SER1",
        "adb",
        runner.clone(),
        Duration::from_secs(1),
        Duration::from_secs(2),
    ));
    let recovery = Arc::new(FakeRecovery::default());
    let controller = DeviceController::new(device, Arc::new(FakeMonitor::new()), runner.clone(), config);
    controller.set_recovery(recovery.clone());
    AdbHarness {
        controller: Arc::new(controller),
        runner,
        recovery,
    }
}

/// Short waits, no boot-time property checks, immediate logcat start.
pub(crate) fn test_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.command.max_attempts = 3;
    config.boot.enable_root = false;
    config.boot.audio_silent = false;
    config.boot.set_monkey = false;
    config.boot.disable_dialing = false;
    config.boot.disable_keyguard = false;
    config.wait.online_timeout_ms = 20;
    config.wait.available_timeout_ms = 20;
    config.wait.fastboot_timeout_ms = 20;
    config.wait.root_restart_timeout_ms = 20;
    config.logcat.start_delay_ms = 0;
    config.logcat.reconnect_settle_ms = 10;
    config.logcat.reconnect_wait_ms = 200;
    config
}

pub(crate) struct Harness {
    pub controller: Arc<DeviceController>,
    pub device: Arc<FakeDevice>,
    pub monitor: Arc<FakeMonitor>,
    pub recovery: Arc<FakeRecovery>,
    pub runner: Arc<FakeRunner>,
}

pub(crate) fn harness_with(config: DeviceConfig, runner: FakeRunner) -> Harness {
    let device = Arc::new(FakeDevice::new("SER1"));
    let monitor = Arc::new(FakeMonitor::new());
    let recovery = Arc::new(FakeRecovery::default());
    let runner = Arc::new(runner);
    let controller = DeviceController::new(
        device.clone(),
        monitor.clone(),
        runner.clone(),
        config,
    );
    controller.set_recovery(recovery.clone());
    Harness {
        controller: Arc::new(controller),
        device,
        monitor,
        recovery,
        runner,
    }
}

pub(crate) fn harness() -> Harness {
    harness_with(test_config(), FakeRunner::new())
}
