// Build script to inject version information from git tags
//
// Falls back to CARGO_PKG_VERSION when git is unavailable or the tree has no
// tags.

use std::process::Command;

fn main() {
    let version = git_version().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=FAIRSIM_VERSION={}", version);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
    println!("cargo:rerun-if-changed=.git/refs/tags");
}

fn git_version() -> Option<String> {
    // "v0.1.0", "v0.1.0-5-gabc123", or "abc123-dirty"
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    let base = env!("CARGO_PKG_VERSION");

    match described.strip_prefix('v') {
        // tagged build: keep only the tag's version number
        Some(tagged) => Some(tagged.split('-').next().unwrap_or(tagged).to_string()),
        None => match described.strip_suffix("-dirty") {
            Some(commit) => Some(format!("{}-{}-dirty", base, commit)),
            None => Some(format!("{}-{}", base, described)),
        },
    }
}
