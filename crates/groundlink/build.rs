//! Stamps the build target, profile and serial backend into `version --extended`.

use std::env;

fn main() {
    for (var, key) in [
        ("TARGET", "GROUNDLINK_BUILD_TARGET"),
        ("PROFILE", "GROUNDLINK_BUILD_PROFILE"),
    ] {
        println!("cargo:rerun-if-env-changed={var}");
        if let Ok(value) = env::var(var) {
            println!("cargo:rustc-env={key}={value}");
        }
    }

    let serial = if env::var_os("CARGO_CFG_UNIX").is_some() {
        "termios"
    } else {
        "unsupported"
    };
    println!("cargo:rustc-env=GROUNDLINK_SERIAL_BACKEND={serial}");
}
