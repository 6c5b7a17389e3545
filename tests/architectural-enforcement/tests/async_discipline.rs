//! Enforcement: no blocking calls on the request path
//!
//! **Policy**: Production code in the relay crates runs on the tokio runtime
//! and MUST NOT park a worker thread. Sleeping, blocking sockets and nested
//! runtimes stall every session scheduled on that thread.
//!
//! **Required**: `tokio::time::sleep`, `tokio::net`, `.await`.

use architectural_enforcement::{rust_files, scan, workspace_root, Violation};

fn production_files() -> Vec<std::path::PathBuf> {
    let root = workspace_root();
    let mut files = rust_files(&root.join("relay/core/src"));
    files.extend(rust_files(&root.join("relay/daemon/src")));
    files
}

fn report(violations: &[Violation], headline: &str) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {headline}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\nFound {} violation(s). Fix these before merging!", violations.len());
}

#[test]
fn test_production_files_are_found() {
    assert!(
        production_files().len() > 10,
        "scanner found no sources; is the workspace layout unchanged?"
    );
}

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = scan(
        &production_files(),
        &["std::thread::sleep", "thread::sleep("],
        "Blocking sleep",
    );
    report(
        &violations,
        "Blocking sleep found in production code! Use tokio::time::sleep().await",
    );
}

#[test]
fn test_no_blocking_network_io() {
    let violations = scan(
        &production_files(),
        &[
            "std::net::TcpStream",
            "std::net::TcpListener",
            "reqwest::blocking",
        ],
        "Blocking network I/O",
    );
    report(
        &violations,
        "Blocking network I/O found in production code! Use tokio::net",
    );
}

#[test]
fn test_no_nested_runtimes_or_global_state() {
    let violations = scan(
        &production_files(),
        &[".block_on(", "Runtime::new(", "static mut "],
        "Nested runtime or mutable global",
    );
    report(
        &violations,
        "Nested runtime or `static mut` found in production code!",
    );
}
