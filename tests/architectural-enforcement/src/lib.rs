//! Architectural Enforcement
//!
//! Source scanners used by the integration tests in `tests/` to keep
//! production code in `relay/*/src` free of blocking calls:
//! - No `sleep()` outside tests
//! - No blocking HTTP client, sockets or file I/O inside async functions
//!
//! Everything after a file's `#[cfg(test)]` line, and `test_utils.rs`
//! files, are treated as test code and skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/daemon/src"];

/// One offending line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule was broken
    pub rule: &'static str,
    /// The trimmed source line
    pub source: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}: {}", self.path.display(), self.line, self.rule, self.source)
    }
}

/// A line-level rule
pub struct Rule {
    /// Name shown in reports
    pub name: &'static str,
    /// Substrings that trigger the rule
    pub patterns: &'static [&'static str],
    /// Only flag lines inside `async fn` bodies
    pub async_only: bool,
}

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from("../.."))
}

/// Production lines of a file: code before `#[cfg(test)]`, comments stripped
#[must_use]
pub fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|line| line.split("//").next().unwrap_or(line))
        .collect()
}

/// Whether `idx` sits inside an `async fn`, judged by the nearest fn header above it
#[must_use]
pub fn is_in_async_function(lines: &[&str], idx: usize) -> bool {
    for line in lines[..=idx].iter().rev() {
        let line = line.trim();
        if line.contains("async fn ") || line.contains("async move") || line.contains("async {") {
            return true;
        }
        if line.starts_with("fn ") || line.contains(" fn ") {
            return false;
        }
        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return false;
        }
    }
    false
}

/// Scan one file's content against `rules`
#[must_use]
pub fn scan_source(path: &Path, content: &str, rules: &[Rule]) -> Vec<Violation> {
    let lines = production_lines(content);
    let mut violations = Vec::new();

    for (idx, code) in lines.iter().enumerate() {
        for rule in rules {
            if !rule.patterns.iter().any(|p| code.contains(p)) {
                continue;
            }
            if rule.async_only && !is_in_async_function(&lines, idx) {
                continue;
            }
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                rule: rule.name,
                source: code.trim().to_string(),
            });
        }
    }
    violations
}

/// Scan every production file in the workspace
#[must_use]
pub fn scan_workspace(rules: &[Rule]) -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for entry in walkdir::WalkDir::new(root.join(dir))
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("rs")
                || path.file_name().and_then(|s| s.to_str()) == Some("test_utils.rs")
            {
                continue;
            }
            if let Ok(content) = fs::read_to_string(path) {
                violations.extend(scan_source(path, &content, rules));
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLEEP: Rule = Rule {
        name: "sleep",
        patterns: &["thread::sleep"],
        async_only: false,
    };

    #[test]
    fn test_test_modules_are_skipped() {
        let source = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() { std::thread::sleep(d); }\n}\n";
        assert!(scan_source(Path::new("x.rs"), source, &[SLEEP]).is_empty());
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "fn a() {\n    // std::thread::sleep is banned\n}\n";
        assert!(scan_source(Path::new("x.rs"), source, &[SLEEP]).is_empty());
    }

    #[test]
    fn test_async_detection() {
        let lines = ["async fn bad() {", "    let x = 1;", "}", "fn ok() {", "    let y = 2;"];
        assert!(is_in_async_function(&lines, 1));
        assert!(!is_in_async_function(&lines, 4));
    }

    #[test]
    fn test_violation_reports_line() {
        let source = "fn a() {\n    std::thread::sleep(d);\n}\n";
        let found = scan_source(Path::new("x.rs"), source, &[SLEEP]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
    }
}
