use std::process::Command;

/// Short commit hash of the checkout, suffixed with `-dirty` when the tree
/// has uncommitted changes. Falls back to "unknown" outside a git checkout.
fn git_revision() -> String {
    let Some(sha) = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
    else {
        return "unknown".to_string();
    };

    let dirty = Command::new("git")
        .args(["diff", "--quiet"])
        .status()
        .map(|status| !status.success())
        .unwrap_or(false);

    if dirty {
        format!("{sha}-dirty")
    } else {
        sha
    }
}

fn main() {
    println!("cargo:rustc-env=CLAI_GIT_SHA={}", git_revision());
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
