// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=BACKDROP_VERSION");

    // Packagers can pin the version string
    let version = std::env::var("BACKDROP_VERSION")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(describe_version);

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// Crate version, suffixed with the short commit hash when built from git
fn describe_version() -> String {
    let pkg_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".into());

    match short_commit() {
        Some(hash) => format!("{}-{}", pkg_version, hash),
        None => pkg_version,
    }
}

fn short_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|hash| !hash.is_empty())
}
