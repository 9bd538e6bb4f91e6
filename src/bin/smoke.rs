use std::io::Read;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use lazy_blacktea_device_lib::app::adb::locator::validate_tool_program;
use lazy_blacktea_device_lib::app::adb::runner::{CommandRunner, ProcessRunner};
use lazy_blacktea_device_lib::app::config::{load_config, load_config_from_path, DeviceConfig};
use lazy_blacktea_device_lib::app::device::DeviceController;
use lazy_blacktea_device_lib::app::error::DeviceError;
use lazy_blacktea_device_lib::app::logging::init_logging;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Args {
    serial: Option<String>,
    config: Option<PathBuf>,
    sync_dir: Option<PathBuf>,
    remote_dir: String,
    logcat_secs: u64,
    json: bool,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    serial: Option<String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|skip
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut serial = std::env::var("ANDROID_SERIAL")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let mut config = None;
    let mut sync_dir = None;
    let mut remote_dir = "/data/local/tmp".to_string();
    let mut logcat_secs = 3u64;
    let mut json = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--serial" => {
                serial = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if serial.is_none() {
                    return Err("--serial requires a value".to_string());
                }
            }
            "--config" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--config requires a value".to_string())?;
                config = Some(PathBuf::from(value));
            }
            "--sync-dir" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--sync-dir requires a value".to_string())?;
                sync_dir = Some(PathBuf::from(value));
            }
            "--remote-dir" => {
                remote_dir = it
                    .next()
                    .ok_or_else(|| "--remote-dir requires a value".to_string())?;
                if !remote_dir.starts_with('/') {
                    return Err("--remote-dir must be an absolute device path".to_string());
                }
            }
            "--logcat-secs" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--logcat-secs requires a value".to_string())?;
                logcat_secs = value
                    .parse()
                    .map_err(|_| format!("--logcat-secs expects a number, got {value}"))?;
            }
            "--json" => {
                json = true;
            }
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--serial SERIAL] [--config FILE] [--sync-dir DIR] [--remote-dir PATH] [--logcat-secs N] [--json]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    Ok(Args {
        serial,
        config,
        sync_dir,
        remote_dir,
        logcat_secs,
        json,
    })
}

fn pick_single_device(config: &DeviceConfig) -> Result<String, String> {
    let result = ProcessRunner.run_timed(
        config.command.timeout(),
        &config.tools.adb_path,
        &["devices".to_string()],
    );
    if !result.is_success() {
        return Err(format!("adb devices failed: {}", result.stderr.trim()));
    }
    let online: Vec<String> = result
        .stdout
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect();
    match online.as_slice() {
        [] => Err("No online adb devices found.".to_string()),
        [serial] => Ok(serial.clone()),
        many => Err(format!(
            "Multiple online devices found ({}). Set ANDROID_SERIAL or pass --serial.",
            many.join(", ")
        )),
    }
}

fn run_check<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, f: F) -> bool
where
    F: FnOnce() -> Result<Option<String>, DeviceError>,
{
    let start = Instant::now();
    let outcome = f();
    let duration_ms = start.elapsed().as_millis();
    let passed = outcome.is_ok();
    checks.push(match outcome {
        Ok(detail) => SmokeCheck {
            name,
            status: "pass",
            duration_ms,
            detail,
            error_code: None,
            error: None,
        },
        Err(err) => SmokeCheck {
            name,
            status: "fail",
            duration_ms,
            detail: None,
            error_code: Some(err.code()),
            error: Some(err.to_string()),
        },
    });
    passed
}

fn skip(checks: &mut Vec<SmokeCheck>, name: &'static str, reason: &str) {
    checks.push(SmokeCheck {
        name,
        status: "skip",
        duration_ms: 0,
        detail: Some(reason.to_string()),
        error_code: None,
        error: None,
    });
}

fn emit(summary: &SmokeSummary, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
        return;
    }
    println!(
        "{} {} trace_id={} serial={}",
        summary.tool,
        summary.status,
        summary.trace_id,
        summary.serial.as_deref().unwrap_or("-")
    );
    for check in &summary.checks {
        let note = check
            .error
            .as_deref()
            .or(check.detail.as_deref())
            .unwrap_or_default();
        println!("  [{}] {} ({} ms) {}", check.status, check.name, check.duration_ms, note);
    }
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let mut checks: Vec<SmokeCheck> = Vec::new();
    let mut summary = SmokeSummary {
        tool: "lazy_blacktea_device_smoke",
        status: "pass",
        trace_id: trace_id.clone(),
        serial: args.serial.clone(),
        checks: Vec::new(),
    };

    let loaded = match &args.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };
    let config = match loaded {
        Ok(cfg) => cfg,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "load_config",
                status: "fail",
                duration_ms: 0,
                detail: None,
                error_code: Some(err.code()),
                error: Some(err.to_string()),
            });
            summary.status = "fail";
            summary.checks = checks;
            emit(&summary, args.json);
            std::process::exit(1);
        }
    };
    init_logging(&config.logging.log_level);
    info!(trace_id = %trace_id, "smoke run starting");

    let tools_ok = run_check(&mut checks, "tool_paths", || {
        validate_tool_program(&config.tools.adb_path).map_err(DeviceError::validation)?;
        validate_tool_program(&config.tools.fastboot_path).map_err(DeviceError::validation)?;
        Ok(Some(format!("{} / {}", config.tools.adb_path, config.tools.fastboot_path)))
    });
    if !tools_ok {
        summary.status = "fail";
        summary.checks = checks;
        emit(&summary, args.json);
        std::process::exit(1);
    }

    let serial = match args.serial.clone().map(Ok).unwrap_or_else(|| pick_single_device(&config)) {
        Ok(serial) => serial,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    summary.serial = Some(serial.clone());

    let device = DeviceController::connect(&serial, config);
    let mut ok = true;

    ok &= run_check(&mut checks, "product_type", || {
        device.get_product_type().map(|product| product.or(Some("unknown".to_string())))
    });
    ok &= run_check(&mut checks, "shell_echo", || {
        let output = device.execute_shell_command("echo lazy_blacktea")?;
        if output.contains("lazy_blacktea") {
            Ok(None)
        } else {
            Err(DeviceError::system(format!("unexpected echo output: {}", output.trim())))
        }
    });
    ok &= run_check(&mut checks, "free_space", || {
        device
            .get_external_store_free_space()
            .map(|kb| Some(format!("{kb}K available")))
    });

    match &args.sync_dir {
        Some(local) => {
            ok &= run_check(&mut checks, "sync_files", || {
                if device.sync_files(local, &args.remote_dir)? {
                    Ok(Some(format!("{} -> {}", local.display(), args.remote_dir)))
                } else {
                    Err(DeviceError::validation(format!(
                        "sync of {} did not complete",
                        local.display()
                    )))
                }
            });
        }
        None => skip(&mut checks, "sync_files", "no --sync-dir given"),
    }

    if args.logcat_secs > 0 {
        ok &= run_check(&mut checks, "logcat_capture", || {
            device.start_logcat()?;
            thread::sleep(Duration::from_secs(args.logcat_secs));
            let mut captured = Vec::new();
            let read = device.get_logcat().read_to_end(&mut captured);
            device.stop_logcat();
            read.map_err(|err| DeviceError::system(format!("failed to read logcat: {err}")))?;
            Ok(Some(format!("{} bytes", captured.len())))
        });
    } else {
        skip(&mut checks, "logcat_capture", "--logcat-secs is 0");
    }

    summary.status = if ok { "pass" } else { "fail" };
    summary.checks = checks;
    emit(&summary, args.json);
    if !ok {
        std::process::exit(1);
    }
}
