//! Architectural Enforcement
//!
//! Source scanners shared by the enforcement tests in `tests/`. The tests
//! keep the streaming engine honest about two rules:
//! - Nothing on the request path blocks a runtime thread
//! - The engine core never depends on the HTTP stack
//!
//! Scanning is line-based. Code inside `#[cfg(test)]` modules and after a
//! `// arch: allow` marker on the same line is ignored.

use std::fs;
use std::path::{Path, PathBuf};

/// A forbidden pattern found in production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the match
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
    /// Why the pattern is forbidden
    pub rule: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from("../.."))
}

/// All `.rs` files below `dir`, sorted
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// Production lines of a source file as `(line_number, code)` pairs
///
/// Line comments are stripped, and everything from a `#[cfg(test)]`
/// attribute to the end of the file is dropped.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") || line.contains("// arch: allow") {
            continue;
        }
        let code = line.split("//").next().unwrap_or(line);
        if !code.trim().is_empty() {
            out.push((idx + 1, code));
        }
    }
    out
}

/// Scan `files` for any of `patterns`, reporting each hit under `rule`
#[must_use]
pub fn scan(files: &[PathBuf], patterns: &[&str], rule: &'static str) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in files {
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            if patterns.iter().any(|p| code.contains(p)) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: code.trim().to_string(),
                    rule,
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let src = concat!(
            "fn a() {}\n",
            "// note\n",
            "fn b() {} // trailing\n",
            "#[cfg(test)]\n",
            "mod tests { fn c() {} }\n",
        );
        let lines = production_lines(src);
        assert_eq!(lines, vec![(1, "fn a() {}"), (3, "fn b() {} ")]);
    }

    #[test]
    fn test_allow_marker_skips_line() {
        let src = "std::thread::sleep(d); // arch: allow\n";
        assert!(production_lines(src).is_empty());
    }
}
