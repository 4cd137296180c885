#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

fn groundlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_groundlink"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .expect("groundlink should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn encode_prints_wire_frame() {
    let output = groundlink(&["--format", "raw", "encode", "--type", "analog-data-request"]);
    assert!(output.status.success());
    assert_eq!(output.stdout, b"(C>@)");

    let output = groundlink(&[
        "--format", "json", "encode", "--type", "D", "--values", "100,-50,0",
    ]);
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(value["frame"], "(D=sM=ply=====MA)");
    assert_eq!(value["checksum"], 1028);
    assert_eq!(value["wire_size"], 17);
}

#[test]
fn encode_raw_payload() {
    let output = groundlink(&[
        "--format", "pretty", "encode", "--type", "motor-control", "--payload", "010203",
    ]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "(G=ME@BS)");
}

#[test]
fn encode_rejects_bad_arguments() {
    let output = groundlink(&["encode", "--type", "param-save", "--values", "1"]);
    assert_eq!(output.status.code(), Some(64));

    let values = vec!["1"; 21].join(",");
    let output = groundlink(&["encode", "--type", "D", "--values", &values]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("too many channels"));
}

#[test]
fn decode_prints_packets() {
    let output = groundlink(&["--format", "json", "decode", "xx(D=sM=ply=====MA)(E>B)"]);
    assert!(output.status.success());
    let lines: Vec<serde_json::Value> = stdout(&output)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["kind"], "analog-data-response");
    assert_eq!(lines[0]["values"], serde_json::json!([100, -50, 0]));
    assert_eq!(lines[1]["kind"], "device-info-request");
    assert_eq!(lines[1]["tag"], "E");
}

#[test]
fn decode_invalid_frame_returns_60() {
    let output = groundlink(&["decode", "(C>A)"]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("checksum mismatch"));

    let output = groundlink(&["decode", "(Z>W)"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn version_reports_package_version() {
    let output = groundlink(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        stdout(&output).trim(),
        format!("groundlink {}", env!("CARGO_PKG_VERSION"))
    );

    let output = groundlink(&["version", "--extended"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("protocol: max_frame=200 max_channels=20"));
    assert!(!text.contains("target: unknown"), "{text}");
    assert!(!text.contains("profile: unknown"), "{text}");
    let serial = if cfg!(unix) { "serial: termios" } else { "serial: unsupported" };
    assert!(text.contains(serial), "{text}");
}

#[test]
fn doctor_without_device_passes() {
    let output = groundlink(&["--format", "json", "doctor"]);
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(value["overall"], "pass");
}

#[test]
fn doctor_missing_device_returns_30() {
    let output = groundlink(&["--format", "raw", "doctor", "/dev/groundlink-missing"]);
    assert_eq!(output.status.code(), Some(30));
    assert_eq!(stdout(&output).trim(), "fail");
}

#[test]
fn monitor_missing_device_returns_3() {
    let output = groundlink(&["monitor", "/dev/groundlink-missing", "--count", "1"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("open failed"));
}

#[cfg(target_os = "linux")]
mod pty {
    use std::ffi::CStr;
    use std::fs::File;
    use std::io::Write;
    use std::os::fd::FromRawFd;
    use std::path::PathBuf;
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    use super::*;

    fn open_pty() -> (File, PathBuf) {
        // SAFETY: posix_openpt has no pointer arguments.
        let master = unsafe { libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY) };
        assert!(master >= 0, "posix_openpt failed");
        // SAFETY: `master` is a valid pty master descriptor.
        unsafe {
            assert_eq!(libc::grantpt(master), 0);
            assert_eq!(libc::unlockpt(master), 0);
        }
        let mut name = [0 as libc::c_char; 128];
        // SAFETY: `name` is writable for its full length.
        let rc = unsafe { libc::ptsname_r(master, name.as_mut_ptr(), name.len()) };
        assert_eq!(rc, 0, "ptsname_r failed");
        // SAFETY: ptsname_r wrote a NUL-terminated string into `name`.
        let slave = unsafe { CStr::from_ptr(name.as_ptr()) }
            .to_str()
            .unwrap()
            .to_owned();
        // SAFETY: we own `master` and hand it to exactly one File.
        let master = unsafe { File::from_raw_fd(master) };
        (master, PathBuf::from(slave))
    }

    #[test]
    fn monitor_prints_device_packets() {
        let (mut master, slave) = open_pty();
        let mut child = Command::new(env!("CARGO_BIN_EXE_groundlink"))
            .args(["--log-level", "error", "--format", "json", "monitor"])
            .arg(&slave)
            .args(["--types", "D", "--count", "2", "--timeout", "10s", "--attitude"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("monitor should start");

        let deadline = Instant::now() + Duration::from_secs(10);
        while child.try_wait().unwrap().is_none() {
            assert!(Instant::now() < deadline, "monitor did not exit");
            // Noise and a parameter response nobody subscribed to.
            let _ = master.write_all(b"~~(I>F)(D=sM=ply=====MA)");
            std::thread::sleep(Duration::from_millis(50));
        }

        let output = child.wait_with_output().unwrap();
        assert!(output.status.success());
        let lines: Vec<serde_json::Value> = stdout(&output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        let packets: Vec<_> = lines.iter().filter(|l| l["event"] == "packet").collect();
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p["kind"] == "analog-data-response"));
        assert!(lines.iter().any(|l| l["event"] == "attitude"));
        let stats = lines.last().unwrap();
        assert_eq!(stats["event"], "stats");
        assert!(stats["frames_decoded"].as_u64().unwrap() >= 2);
    }
}
