use std::path::Path;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

fn resolve_program(config_command_path: &str, default_name: &str) -> String {
    let normalized = normalize_command_path(config_command_path);
    if normalized.is_empty() {
        default_name.to_string()
    } else {
        normalized
    }
}

pub fn resolve_adb_program(config_command_path: &str) -> String {
    resolve_program(config_command_path, "adb")
}

pub fn resolve_fastboot_program(config_command_path: &str) -> String {
    resolve_program(config_command_path, "fastboot")
}

/// Bare tool names are left to PATH lookup; explicit paths must point at a file.
pub fn validate_tool_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("tool command is empty".to_string());
    }
    if !program.contains('/') && !program.contains('\\') {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(format!("{program} must point to an executable file"));
    }
    if !path.exists() {
        return Err(format!("{program} not found at the configured path"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/android/platform-tools/adb\"  "),
            "/opt/android/platform-tools/adb"
        );
        assert_eq!(
            normalize_command_path("  '/opt/android/platform-tools/fastboot'  "),
            "/opt/android/platform-tools/fastboot"
        );
    }

    #[test]
    fn resolves_empty_to_default_names() {
        assert_eq!(resolve_adb_program("   "), "adb");
        assert_eq!(resolve_fastboot_program(""), "fastboot");
        assert_eq!(resolve_fastboot_program("/usr/bin/fastboot"), "/usr/bin/fastboot");
    }

    #[test]
    fn validates_nonexistent_path() {
        assert!(validate_tool_program("fastboot").is_ok());
        let err = validate_tool_program("/this/path/should/not/exist/adb").unwrap_err();
        assert!(err.contains("not found"));
    }
}
