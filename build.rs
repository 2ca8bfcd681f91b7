use std::env;
use std::process::Command;

fn main() {
    emit("DETLENS_BUILD_TIMESTAMP", &chrono::Utc::now().format("%Y%m%d.%H%M%S").to_string());
    emit("DETLENS_GIT_REVISION", &git_revision().unwrap_or_else(|| "unknown".into()));

    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_else(|_| "unknown".into());
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_else(|_| "unknown".into());
    emit("DETLENS_TARGET", &format!("{arch}-{os}"));
    emit("DETLENS_PROFILE", &env::var("PROFILE").unwrap_or_else(|_| "unknown".into()));

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
    println!("cargo:rerun-if-changed=.git/index");
}

fn emit(key: &str, value: &str) {
    println!("cargo:rustc-env={key}={value}");
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}

/// Short commit hash, with "-dirty" when tracked files have local changes
fn git_revision() -> Option<String> {
    let hash = git(&["rev-parse", "--short=7", "HEAD"])?;
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).map_or(false, |s| !s.is_empty());
    Some(if dirty { format!("{hash}-dirty") } else { hash })
}
