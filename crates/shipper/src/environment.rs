use std::process::Command;

use crate::types::EnvironmentFingerprint;

/// Collect environment fingerprint information
pub fn collect_environment_fingerprint() -> EnvironmentFingerprint {
    // Get shipper version from CARGO_PKG_VERSION
    let shipper_version = env!("CARGO_PKG_VERSION").to_string();

    // Get cargo version by running `cargo --version`
    let cargo_version = get_cargo_version();

    // Get rust version by running `rustc --version`
    let rust_version = get_rust_version();

    // Get OS and architecture from std::env::consts
    let os = std::env::consts::OS.to_string();
    let arch = std::env::consts::ARCH.to_string();

    EnvironmentFingerprint {
        shipper_version,
        cargo_version,
        rust_version,
        os,
        arch,
    }
}

/// Get cargo version by running `cargo --version`
fn get_cargo_version() -> Option<String> {
    let output = Command::new("cargo").arg("--version").output().ok()?;

    if output.status.success() {
        let version_string = String::from_utf8_lossy(&output.stdout);
        // Parse the version string, e.g., "cargo 1.75.0 (1d8b05cdd 2023-11-20)"
        // We want just the version part like "1.75.0"
        version_string
            .split_whitespace()
            .nth(1)
            .map(|s| s.to_string())
    } else {
        None
    }
}

/// Get rust version by running `rustc --version`
fn get_rust_version() -> Option<String> {
    let output = Command::new("rustc").arg("--version").output().ok()?;

    if output.status.success() {
        let version_string = String::from_utf8_lossy(&output.stdout);
        // Parse the version string, e.g., "rustc 1.75.0 (82e1608df 2023-12-21)"
        // We want just the version part like "1.75.0"
        version_string
            .split_whitespace()
            .nth(1)
            .map(|s| s.to_string())
    } else {
        None
    }
}
