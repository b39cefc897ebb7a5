//! Stamps the binary with the commit it was built from and when.
//! Exposed by `/health` and logged at startup.

use std::process::Command;

fn git_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}

fn main() {
    let commit = git_commit().unwrap_or_else(|| "unknown".to_string());
    let built_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    println!("cargo:rustc-env=SEL_GIT_COMMIT={}", commit);
    println!("cargo:rustc-env=SEL_BUILT_AT={}", built_at);
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
