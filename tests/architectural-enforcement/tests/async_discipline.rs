//! Integration Test: Async Discipline
//!
//! Production code in the relay crates runs on the Tokio runtime and must
//! never block it.
//!
//! **Forbidden everywhere**: `std::thread::sleep`, `reqwest::blocking`
//! **Forbidden in async functions**: `std::fs`, blocking `std::net` sockets,
//! `std::process::Command`
//!
//! Periodic work uses `tokio::time::interval`; waiting uses channels or
//! `tokio::time::timeout`.

use architectural_enforcement::{scan_workspace, workspace_root, Rule, PRODUCTION_DIRS};

fn report(title: &str, violations: &[architectural_enforcement::Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{title}\n");
    for violation in violations {
        eprintln!("  {violation}");
    }
    panic!("\nFound {} violation(s) in production code.", violations.len());
}

#[test]
fn test_production_dirs_exist() {
    let root = workspace_root();
    for dir in PRODUCTION_DIRS {
        assert!(root.join(dir).is_dir(), "missing {dir}");
    }
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_workspace(&[
        Rule {
            name: "Thread sleep",
            patterns: &["thread::sleep"],
            async_only: false,
        },
        Rule {
            name: "Sleep in async code (use interval or timeout)",
            patterns: &["time::sleep("],
            async_only: true,
        },
    ]);
    report("Sleep calls found in production code", &violations);
}

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = scan_workspace(&[
        Rule {
            name: "Blocking HTTP client",
            patterns: &["reqwest::blocking"],
            async_only: false,
        },
        Rule {
            name: "Blocking file I/O",
            patterns: &["std::fs::"],
            async_only: true,
        },
        Rule {
            name: "Blocking socket",
            patterns: &["std::net::TcpStream", "std::net::TcpListener", "std::net::UdpSocket"],
            async_only: false,
        },
        Rule {
            name: "Blocking process",
            patterns: &["std::process::Command"],
            async_only: true,
        },
    ]);
    report("Blocking I/O found in production code", &violations);
}
