use std::path::Path;

pub fn validate_device_path(path: &str) -> Result<(), String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err("device path is required".to_string());
    }
    if !trimmed.starts_with('/') {
        return Err("device path must be an absolute device path starting with '/'".to_string());
    }
    if trimmed.contains('\0') {
        return Err("device path contains invalid characters".to_string());
    }
    for segment in trimmed.split('/') {
        if segment == ".." {
            return Err("device path must not contain '..' segments".to_string());
        }
    }
    Ok(())
}

pub fn join_device_path(parent: &str, name: &str) -> String {
    let parent = parent.trim().trim_end_matches('/');
    let name = name.trim_matches('/');
    if name.is_empty() {
        return if parent.is_empty() { "/".to_string() } else { parent.to_string() };
    }
    format!("{parent}/{name}")
}

/// Non-empty segments of an absolute device path, root first.
pub fn device_path_segments(device_path: &str) -> Vec<&str> {
    device_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Final component of a local path, as `adb push` appends it under a target directory.
pub fn local_base_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
}

pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
