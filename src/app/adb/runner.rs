use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::models::{CommandResult, CommandStatus};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Spawns host processes. Passed explicitly to the controller so tests can
/// substitute a fake.
pub trait CommandRunner: Send + Sync {
    fn run_timed(&self, timeout: Duration, program: &str, args: &[String]) -> CommandResult;

    /// Runs until exit, timeout, or `on_output` returning `false`.
    /// `on_output` also receives an empty slice on idle ticks so callers can
    /// cancel a silent stream. `timeout = None` means no limit.
    fn run_streaming(
        &self,
        timeout: Option<Duration>,
        program: &str,
        args: &[String],
        on_output: &mut dyn FnMut(&[u8]) -> bool,
    ) -> CommandResult;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run_timed(&self, timeout: Duration, program: &str, args: &[String]) -> CommandResult {
        run_command_with_timeout(program, args, timeout)
    }

    fn run_streaming(
        &self,
        timeout: Option<Duration>,
        program: &str,
        args: &[String],
        on_output: &mut dyn FnMut(&[u8]) -> bool,
    ) -> CommandResult {
        run_command_streaming(program, args, timeout, on_output)
    }
}

fn spawn_piped(program: &str, args: &[String]) -> Result<Child, CommandResult> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            CommandResult::with_status(
                CommandStatus::Exception,
                "",
                format!("Failed to spawn {program}: {err}"),
            )
        })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

pub fn run_command_with_timeout(program: &str, args: &[String], timeout: Duration) -> CommandResult {
    let mut child = match spawn_piped(program, args) {
        Ok(child) => child,
        Err(result) => return result,
    };

    // Drain stdout/stderr in parallel; otherwise, a chatty child process can block once the pipe
    // buffer fills, and we will incorrectly hit the timeout.
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        kill_and_reap(&mut child);
        return CommandResult::with_status(CommandStatus::Exception, "", "Failed to capture output");
    };
    let stdout_handle = drain(stdout);
    let stderr_handle = drain(stderr);

    let start = Instant::now();
    let (status, exit_code) = loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let code = status.code();
                if status.success() {
                    break (CommandStatus::Success, code);
                }
                break (CommandStatus::Failed, code);
            }
            Ok(None) => {
                if start.elapsed() > timeout {
                    debug!(program, ?timeout, "command timed out");
                    kill_and_reap(&mut child);
                    break (CommandStatus::TimedOut, None);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                warn!(program, error = %err, "failed to poll command");
                kill_and_reap(&mut child);
                break (CommandStatus::Exception, None);
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    CommandResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    }
}

pub fn run_command_streaming(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
    on_output: &mut dyn FnMut(&[u8]) -> bool,
) -> CommandResult {
    let mut child = match spawn_piped(program, args) {
        Ok(child) => child,
        Err(result) => return result,
    };
    let (Some(mut stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        kill_and_reap(&mut child);
        return CommandResult::with_status(CommandStatus::Exception, "", "Failed to capture output");
    };
    let stderr_handle = drain(stderr);

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let reader = std::thread::spawn(move || {
        let mut temp = [0u8; 4096];
        loop {
            match stdout.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(count) => {
                    if tx.send(temp[..count].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let start = Instant::now();
    let status = loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => {
                if !on_output(&chunk) {
                    kill_and_reap(&mut child);
                    break CommandStatus::Success;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                // stdout closed; the child is exiting.
                break match child.wait() {
                    Ok(status) if status.success() => CommandStatus::Success,
                    Ok(_) => CommandStatus::Failed,
                    Err(_) => CommandStatus::Exception,
                };
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if !on_output(&[]) {
            kill_and_reap(&mut child);
            break CommandStatus::Success;
        }
        if timeout.is_some_and(|limit| start.elapsed() > limit) {
            kill_and_reap(&mut child);
            break CommandStatus::TimedOut;
        }
    };

    let _ = reader.join();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();
    let exit_code = child.try_wait().ok().flatten().and_then(|status| status.code());

    CommandResult {
        status,
        stdout: String::new(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    }
}
