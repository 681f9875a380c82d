use std::process::Command;

fn main() {
    // Shown in the startup banner. GIT_SHA wins when building outside a checkout.
    let git_sha = std::env::var("GIT_SHA").ok().or_else(|| {
        Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
    });

    println!(
        "cargo:rustc-env=GATEBOT_GIT_SHA={}",
        git_sha.unwrap_or_else(|| "unknown".to_string())
    );
    println!("cargo:rerun-if-env-changed=GIT_SHA");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
