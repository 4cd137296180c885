use std::path::Path;

use groundlink_transport::{BaudRate, TransportError};
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let mut checks = vec![
        platform_serial_check(),
        baud_check(args.baud),
        compiled_features_check(),
    ];
    match &args.device {
        Some(device) => checks.extend(device_checks(device, args.baud)),
        None => checks.push(CheckResult::new(
            "device",
            CheckStatus::Skip,
            "no device given",
        )),
    }

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("groundlink doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn platform_serial_check() -> CheckResult {
    if cfg!(unix) {
        CheckResult::new("platform_serial", CheckStatus::Pass, "termios serial devices available")
    } else {
        CheckResult::new(
            "platform_serial",
            CheckStatus::Fail,
            "serial transport is only implemented for Unix",
        )
    }
}

fn baud_check(baud: BaudRate) -> CheckResult {
    let supported = BaudRate::ALL
        .iter()
        .map(|rate| rate.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    CheckResult::new(
        "baud",
        CheckStatus::Info,
        format!("{baud} selected (supported: {supported})"),
    )
}

fn compiled_features_check() -> CheckResult {
    let mut features = vec!["cli"];
    if cfg!(feature = "async") {
        features.push("async");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}

fn device_checks(device: &Path, baud: BaudRate) -> Vec<CheckResult> {
    let metadata = match std::fs::metadata(device) {
        Ok(metadata) => metadata,
        Err(err) => {
            return vec![CheckResult::new(
                "device_path",
                CheckStatus::Fail,
                format!("{}: {err}", device.display()),
            )]
        }
    };
    let mut checks = vec![CheckResult::new(
        "device_path",
        CheckStatus::Pass,
        format!("{} exists", device.display()),
    )];
    checks.push(device_type_check(&metadata));
    checks.extend(device_open_checks(device, baud));
    checks
}

#[cfg(unix)]
fn device_type_check(metadata: &std::fs::Metadata) -> CheckResult {
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    let mode = metadata.permissions().mode() & 0o777;
    if metadata.file_type().is_char_device() {
        CheckResult::new(
            "device_type",
            CheckStatus::Pass,
            format!("character device, mode {mode:03o}"),
        )
    } else {
        CheckResult::new(
            "device_type",
            CheckStatus::Warn,
            format!("not a character device (mode {mode:03o})"),
        )
    }
}

#[cfg(not(unix))]
fn device_type_check(_metadata: &std::fs::Metadata) -> CheckResult {
    CheckResult::new("device_type", CheckStatus::Skip, "not checked on this platform")
}

#[cfg(unix)]
fn device_open_checks(device: &Path, baud: BaudRate) -> Vec<CheckResult> {
    use groundlink_transport::{SerialConfig, SerialDevice};

    match SerialDevice::open(SerialConfig::new(device, baud)) {
        Ok(_device) => vec![
            CheckResult::new("device_permissions", CheckStatus::Pass, "read/write access"),
            CheckResult::new(
                "device_configure",
                CheckStatus::Pass,
                format!("8N1 at {baud} applied"),
            ),
        ],
        Err(err) => vec![open_failure_check(&err)],
    }
}

#[cfg(not(unix))]
fn device_open_checks(_device: &Path, _baud: BaudRate) -> Vec<CheckResult> {
    vec![CheckResult::new(
        "device_configure",
        CheckStatus::Skip,
        "serial transport unavailable",
    )]
}

fn open_failure_check(err: &TransportError) -> CheckResult {
    match err {
        TransportError::DeviceUnavailable { source, .. }
            if source.kind() == std::io::ErrorKind::PermissionDenied =>
        {
            CheckResult::new(
                "device_permissions",
                CheckStatus::Fail,
                format!("{err} (is this user in the device's group, e.g. dialout?)"),
            )
        }
        TransportError::DeviceUnavailable { .. } => {
            CheckResult::new("device_permissions", CheckStatus::Fail, err.to_string())
        }
        _ => CheckResult::new("device_configure", CheckStatus::Fail, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            checks: vec![CheckResult::new("x", CheckStatus::Pass, "ok")],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).unwrap();
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn missing_device_fails_path_check() {
        let checks = device_checks(Path::new("/dev/groundlink-missing"), BaudRate::B57600);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].name, "device_path");
        assert_eq!(checks[0].status, CheckStatus::Fail);
    }

    #[cfg(unix)]
    #[test]
    fn regular_file_is_not_a_serial_device() {
        let path = std::env::temp_dir().join(format!("groundlink-doctor-{}", std::process::id()));
        std::fs::write(&path, b"not a tty").unwrap();
        let checks = device_checks(&path, BaudRate::B9600);
        std::fs::remove_file(&path).unwrap();

        let kind = checks.iter().find(|c| c.name == "device_type").unwrap();
        assert_eq!(kind.status, CheckStatus::Warn);
        let configure = checks.last().unwrap();
        assert_eq!(configure.name, "device_configure");
        assert_eq!(configure.status, CheckStatus::Fail);
    }

    #[test]
    fn permission_denied_is_explained() {
        let err = TransportError::DeviceUnavailable {
            path: "/dev/ttyS0".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let check = open_failure_check(&err);
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.detail.contains("dialout"));
    }
}
