use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::adb::parse::{parse_getprop_value, parse_ls_la};
use crate::app::adb::paths::shell_quote;
use crate::app::adb::runner::CommandRunner;
use crate::app::adb::transfer::{
    classify_command, classify_shell, classify_transfer, parse_install_outcome,
};
use crate::app::error::TransientError;
use crate::app::models::RemoteFileEntry;

/// Sink for shell output as it arrives.
pub trait ShellOutputReceiver: Send {
    fn add_output(&mut self, data: &[u8]);

    /// Checked between chunks; `true` ends the command early.
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct CollectingReceiver {
    buffer: Vec<u8>,
}

impl CollectingReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }
}

impl ShellOutputReceiver for CollectingReceiver {
    fn add_output(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }
}

/// Live connection to one device over the bridge protocol.
pub trait RemoteDevice: Send + Sync {
    fn serial(&self) -> &str;

    /// `timeout = None` runs until the command ends or the receiver cancels.
    fn execute_shell(
        &self,
        command: &str,
        receiver: &mut dyn ShellOutputReceiver,
        timeout: Option<Duration>,
    ) -> Result<(), TransientError>;

    fn push_file(&self, local: &Path, remote: &str) -> Result<(), TransientError>;

    fn pull_file(&self, remote: &str, local: &Path) -> Result<(), TransientError>;

    /// Pushes every path into `remote_dir`, each landing under its own base name.
    fn push_files(&self, locals: &[PathBuf], remote_dir: &str) -> Result<(), TransientError>;

    fn list_dir(&self, remote_dir: &str) -> Result<Vec<RemoteFileEntry>, TransientError>;

    fn reboot(&self, into: Option<&str>) -> Result<(), TransientError>;

    fn install_package(&self, package: &Path, reinstall: bool) -> Result<Option<String>, TransientError>;

    fn uninstall_package(&self, package_name: &str) -> Result<Option<String>, TransientError>;

    /// `None` when the property is unset or the device did not answer.
    fn get_property(&self, key: &str) -> Option<String>;
}

pub struct AdbDevice {
    serial: String,
    adb_program: String,
    runner: Arc<dyn CommandRunner>,
    command_timeout: Duration,
    long_timeout: Duration,
}

impl AdbDevice {
    pub fn new(
        serial: impl Into<String>,
        adb_program: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
        command_timeout: Duration,
        long_timeout: Duration,
    ) -> Self {
        Self {
            serial: serial.into(),
            adb_program: adb_program.into(),
            runner,
            command_timeout,
            long_timeout,
        }
    }

    fn args<I, S>(&self, rest: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = vec!["-s".to_string(), self.serial.clone()];
        args.extend(rest.into_iter().map(Into::into));
        args
    }
}

impl RemoteDevice for AdbDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn execute_shell(
        &self,
        command: &str,
        receiver: &mut dyn ShellOutputReceiver,
        timeout: Option<Duration>,
    ) -> Result<(), TransientError> {
        let args = self.args(["shell", command]);
        let result = self.runner.run_streaming(timeout, &self.adb_program, &args, &mut |chunk| {
            if !chunk.is_empty() {
                receiver.add_output(chunk);
            }
            !receiver.is_cancelled()
        });
        classify_shell(&result)?;
        // shell protocol v2 splits the streams; callers parse both
        if !result.stderr.is_empty() {
            receiver.add_output(result.stderr.as_bytes());
        }
        Ok(())
    }

    fn push_file(&self, local: &Path, remote: &str) -> Result<(), TransientError> {
        let args = self.args([
            "push".to_string(),
            local.to_string_lossy().to_string(),
            remote.to_string(),
        ]);
        let result = self.runner.run_timed(self.long_timeout, &self.adb_program, &args);
        classify_transfer(&result).inspect_err(|err| {
            warn!(serial = %self.serial, remote, error = %err, "push failed");
        })
    }

    fn pull_file(&self, remote: &str, local: &Path) -> Result<(), TransientError> {
        let args = self.args([
            "pull".to_string(),
            remote.to_string(),
            local.to_string_lossy().to_string(),
        ]);
        let result = self.runner.run_timed(self.long_timeout, &self.adb_program, &args);
        classify_transfer(&result).inspect_err(|err| {
            warn!(serial = %self.serial, remote, error = %err, "pull failed");
        })
    }

    fn push_files(&self, locals: &[PathBuf], remote_dir: &str) -> Result<(), TransientError> {
        if locals.is_empty() {
            return Ok(());
        }
        let mut rest = vec!["push".to_string()];
        rest.extend(locals.iter().map(|path| path.to_string_lossy().to_string()));
        rest.push(remote_dir.to_string());
        let result = self
            .runner
            .run_timed(self.long_timeout, &self.adb_program, &self.args(rest));
        classify_transfer(&result).inspect_err(|err| {
            warn!(serial = %self.serial, remote_dir, error = %err, "batched push failed");
        })
    }

    fn list_dir(&self, remote_dir: &str) -> Result<Vec<RemoteFileEntry>, TransientError> {
        // Trailing slash so symlinked directories are listed rather than the link.
        let target = format!("{}/", remote_dir.trim_end_matches('/'));
        let mut receiver = CollectingReceiver::new();
        self.execute_shell(
            &format!("ls -la {}", shell_quote(&target)),
            &mut receiver,
            Some(self.command_timeout),
        )?;
        let entries = parse_ls_la(remote_dir, &receiver.output());
        debug!(serial = %self.serial, remote_dir, count = entries.len(), "listed directory");
        Ok(entries)
    }

    fn reboot(&self, into: Option<&str>) -> Result<(), TransientError> {
        let mut rest = vec!["reboot".to_string()];
        if let Some(target) = into.filter(|value| !value.trim().is_empty()) {
            rest.push(target.to_string());
        }
        let result = self
            .runner
            .run_timed(self.command_timeout, &self.adb_program, &self.args(rest));
        classify_command(&result)
    }

    fn install_package(&self, package: &Path, reinstall: bool) -> Result<Option<String>, TransientError> {
        let mut rest = vec!["install".to_string()];
        if reinstall {
            rest.push("-r".to_string());
        }
        rest.push(package.to_string_lossy().to_string());
        let result = self
            .runner
            .run_timed(self.long_timeout, &self.adb_program, &self.args(rest));
        parse_install_outcome(&result)
    }

    fn uninstall_package(&self, package_name: &str) -> Result<Option<String>, TransientError> {
        let result = self.runner.run_timed(
            self.command_timeout,
            &self.adb_program,
            &self.args(["uninstall", package_name]),
        );
        parse_install_outcome(&result)
    }

    fn get_property(&self, key: &str) -> Option<String> {
        let result = self.runner.run_timed(
            self.command_timeout,
            &self.adb_program,
            &self.args(["shell", "getprop", key]),
        );
        if !result.is_success() {
            return None;
        }
        parse_getprop_value(&result.stdout)
    }
}
