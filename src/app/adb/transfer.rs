use crate::app::error::{TransientError, TransientKind};
use crate::app::models::{CommandResult, CommandStatus};

const REJECTION_MARKERS: &[&str] = &[
    "error: device offline",
    "error: device unauthorized",
    "error: no devices/emulators found",
    "error: closed",
    "error: protocol fault",
    "error: device not found",
];

const SYNC_MARKERS: &[&str] = &[
    "failed to copy",
    "couldn't create file",
    "remote secure_mkdirs failed",
    "remote object",
    "read-only file system",
    "no space left on device",
];

fn first_marker<'a>(output: &str, markers: &[&'a str]) -> Option<&'a str> {
    let lower = output.to_lowercase();
    markers.iter().copied().find(|marker| lower.contains(marker))
}

fn rejection_marker(output: &str) -> Option<&'static str> {
    if let Some(marker) = first_marker(output, REJECTION_MARKERS) {
        return Some(marker);
    }
    let lower = output.to_lowercase();
    (lower.contains("error: device '") && lower.contains("' not found")).then_some("device not found")
}

/// Maps a bridge-tool invocation result onto the transient error taxonomy.
pub fn classify_command(result: &CommandResult) -> Result<(), TransientError> {
    match result.status {
        CommandStatus::Success => Ok(()),
        CommandStatus::TimedOut => Err(TransientError::timeout("command timed out")),
        CommandStatus::Exception => Err(TransientError::io(result.stderr.trim().to_string())),
        CommandStatus::Failed => {
            let output = result.combined_output();
            if let Some(marker) = rejection_marker(&output) {
                return Err(TransientError::rejected(format!(
                    "{marker}: {}",
                    output.trim()
                )));
            }
            Err(TransientError::io(format!(
                "exit code {:?}: {}",
                result.exit_code,
                output.trim()
            )))
        }
    }
}

/// A remote command's own exit status is not a transport failure, so only
/// rejections, timeouts and spawn errors count. A timeout means the shell
/// stopped responding.
pub fn classify_shell(result: &CommandResult) -> Result<(), TransientError> {
    if result.status == CommandStatus::Failed && rejection_marker(&result.combined_output()).is_none() {
        return Ok(());
    }
    match classify_command(result) {
        Err(err) if err.kind == TransientKind::Timeout => {
            Err(TransientError::unresponsive("shell command stopped responding"))
        }
        other => other,
    }
}

/// Push/pull outcomes: file-level failures surface as sync errors.
pub fn classify_transfer(result: &CommandResult) -> Result<(), TransientError> {
    if result.status == CommandStatus::Failed {
        let output = result.combined_output();
        if let Some(marker) = first_marker(&output, SYNC_MARKERS) {
            return Err(TransientError::sync(format!("{marker}: {}", output.trim())));
        }
    }
    classify_command(result)
}

/// `Ok(None)` on success, `Ok(Some(reason))` when the package manager refused the
/// package, `Err` when the install never produced a verdict.
pub fn parse_install_outcome(result: &CommandResult) -> Result<Option<String>, TransientError> {
    let output = result.combined_output();
    if let Some(reason) = parse_failure_reason(&output) {
        return Ok(Some(reason));
    }
    classify_command(result)?;
    if output.lines().any(|line| line.trim() == "Success") {
        return Ok(None);
    }
    Err(TransientError::install(format!(
        "unrecognized package manager output: {}",
        output.trim()
    )))
}

fn parse_failure_reason(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|line| line.starts_with("Failure"))?;
    let reason = line
        .split_once('[')
        .and_then(|(_, tail)| tail.rsplit_once(']'))
        .map(|(inner, _)| inner.trim().to_string())
        .unwrap_or_else(|| line.trim_start_matches("Failure").trim().to_string());
    Some(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> CommandResult {
        CommandResult::with_status(CommandStatus::Failed, "", stderr)
    }

    #[test]
    fn classifies_statuses() {
        assert!(classify_command(&CommandResult::success("ok")).is_ok());
        let timeout = CommandResult::with_status(CommandStatus::TimedOut, "", "");
        assert_eq!(classify_command(&timeout).unwrap_err().kind, TransientKind::Timeout);
        assert_eq!(classify_shell(&timeout).unwrap_err().kind, TransientKind::Unresponsive);
        let spawn = CommandResult::with_status(CommandStatus::Exception, "", "no adb");
        assert_eq!(classify_command(&spawn).unwrap_err().kind, TransientKind::Io);
    }

    #[test]
    fn shell_exit_status_is_not_a_transport_failure() {
        assert!(classify_shell(&failed("sh: frobnicate: not found")).is_ok());
        let err = classify_shell(&failed("error: device offline")).unwrap_err();
        assert_eq!(err.kind, TransientKind::Rejected);
    }

    #[test]
    fn detects_rejected_transport() {
        let err = classify_command(&failed("error: device 'ABC' not found")).unwrap_err();
        assert_eq!(err.kind, TransientKind::Rejected);
        let err = classify_command(&failed("error: device offline")).unwrap_err();
        assert_eq!(err.kind, TransientKind::Rejected);
        let err = classify_command(&failed("something else")).unwrap_err();
        assert_eq!(err.kind, TransientKind::Io);
    }

    #[test]
    fn detects_sync_failures() {
        let err = classify_transfer(&failed(
            "adb: error: failed to copy 'a.txt' to '/system/a.txt': remote Read-only file system",
        ))
        .unwrap_err();
        assert_eq!(err.kind, TransientKind::Sync);
    }

    #[test]
    fn parses_install_outcomes() {
        assert_eq!(
            parse_install_outcome(&CommandResult::success("Performing Streamed Install\nSuccess\n")),
            Ok(None)
        );
        let refused = failed("Failure [INSTALL_FAILED_ALREADY_EXISTS: Attempt to re-install]");
        assert_eq!(
            parse_install_outcome(&refused),
            Ok(Some("INSTALL_FAILED_ALREADY_EXISTS: Attempt to re-install".to_string()))
        );
        let garbled = CommandResult::success("???");
        assert_eq!(
            parse_install_outcome(&garbled).unwrap_err().kind,
            TransientKind::Install
        );
    }
}
