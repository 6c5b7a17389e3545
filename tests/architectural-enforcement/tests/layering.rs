//! Enforcement: the engine core does not know about HTTP
//!
//! **Policy**: Token sources, the relay, encoders, the sink and sessions
//! talk to the network only through `FrameWriter`. Only the `transport`
//! module and the error-to-response mapping may import the HTTP stack.

use architectural_enforcement::{rust_files, scan, workspace_root};

const ENGINE_MODULES: &[&str] = &[
    "cancel.rs",
    "relay.rs",
    "token.rs",
    "multiplexer.rs",
    "encoding",
    "sink",
    "source",
    "session",
];

#[test]
fn test_engine_modules_do_not_import_http_stack() {
    let src = workspace_root().join("relay/core/src");
    let mut files = Vec::new();
    for module in ENGINE_MODULES {
        let path = src.join(module);
        if path.is_dir() {
            files.extend(rust_files(&path));
        } else {
            assert!(path.exists(), "engine module missing: {}", path.display());
            files.push(path);
        }
    }

    let violations = scan(
        &files,
        &["axum", "hyper", "tower_http", "reqwest"],
        "HTTP dependency in engine core",
    );

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!(
            "\nEngine modules must reach the network through FrameWriter only ({} violation(s))",
            violations.len()
        );
    }
}
