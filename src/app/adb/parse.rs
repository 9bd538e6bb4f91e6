use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::RemoteFileEntry;

fn date_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").ok()).as_ref()
}

fn time_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{2}:\d{2}(:\d{2})?$").ok()).as_ref()
}

/// Single `getprop <key>` output; empty means unset.
pub fn parse_getprop_value(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

pub fn parse_fastboot_product(output: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"product:\s+(\w+)").ok()).as_ref()?;
    re.captures(output).map(|caps| caps[1].to_string())
}

pub fn parse_fastboot_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?;
            match tokens.next() {
                Some("fastboot") | Some("bootloader") => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Free kilobytes from `df <path>` output in the `1234K available` style.
pub fn parse_df_available_kb(output: &str) -> Option<u64> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(\d+)K available").ok()).as_ref()?;
    re.captures(output)
        .and_then(|caps| caps[1].parse::<u64>().ok())
}

/// Crash and ANR dialogs listed by `dumpsys activity processes`.
pub fn count_error_dialogs(output: &str) -> usize {
    static CRASH: OnceLock<Option<Regex>> = OnceLock::new();
    static ANR: OnceLock<Option<Regex>> = OnceLock::new();
    let crash = CRASH.get_or_init(|| Regex::new(r".*crashing=true.*AppErrorDialog.*").ok());
    let anr = ANR.get_or_init(|| Regex::new(r".*notResponding=true.*AppNotRespondingDialog.*").ok());
    let count = |re: &Option<Regex>| re.as_ref().map_or(0, |re| re.find_iter(output).count());
    count(crash) + count(anr)
}

/// Parses `ls -la` output from both toybox (`perm links user group size date time name`)
/// and legacy toolbox (`perm user group [size] date time name`).
pub fn parse_ls_la(path: &str, output: &str) -> Vec<RemoteFileEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with("total"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let perm = tokens.first()?;
            let (date_re, time_re) = (date_re()?, time_re()?);
            let date_index = tokens.iter().position(|token| date_re.is_match(token))?;
            let time = tokens.get(date_index + 1).filter(|t| time_re.is_match(t))?;
            let name_tokens = tokens.get(date_index + 2..)?;
            if name_tokens.is_empty() {
                return None;
            }
            let mut name = name_tokens.join(" ");
            if perm.starts_with('l') {
                if let Some((link, _target)) = name.split_once(" -> ") {
                    name = link.to_string();
                }
            }
            if name == "." || name == ".." {
                return None;
            }
            let size_bytes = date_index
                .checked_sub(1)
                .and_then(|index| tokens.get(index))
                .and_then(|value| value.parse::<u64>().ok());
            Some(RemoteFileEntry {
                path: join_listing_path(path, &name),
                name,
                is_dir: perm.starts_with('d'),
                size_bytes,
                date: tokens[date_index].to_string(),
                time: time.chars().take(5).collect(),
            })
        })
        .collect()
}

fn join_listing_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{parent}/{name}")
}
