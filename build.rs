//! Build script for stagealloc.
//!
//! Emits build-time notes about enabled features and unsupported targets.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_LOG");

    let log_enabled = env::var("CARGO_FEATURE_LOG").is_ok();
    let diagnostics_enabled = env::var("CARGO_FEATURE_DIAGNOSTICS").is_ok();
    let profile = env::var("PROFILE").unwrap_or_default();
    let family = env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    if !family.split(',').any(|f| f == "unix") {
        emit_warning("stagealloc needs POSIX shared memory and mlock; this target is not unix");
    } else if os != "linux" {
        emit_note("non-Linux unix target: HostRuntime reports all physical memory as free");
    }

    if profile == "release" && !log_enabled && !diagnostics_enabled {
        emit_note("release build without 'log' or 'diagnostics': only installed sinks see diagnostics");
    }
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[stagealloc]    {}", msg);
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[stagealloc] ⚠️  {}", msg);
}
