//! Blocking I/O Prohibition Test
//!
//! The controller, backends and REPL all run on the tokio runtime. A blocking
//! call inside an async function stalls every task on that worker thread,
//! including the one streaming the reply.
//!
//! Synchronous helpers (config loading at startup) may use `std::fs`.

use architectural_enforcement::{enclosing_fn, production_sources, report, scan, FnKind};

const BLOCKING_PATTERNS: &[&str] = &[
    "std::fs::",
    "std::net::",
    "std::process::Command",
    "reqwest::blocking",
    "std::io::stdin()",
    "std::io::stdout()",
    ".read_line(",
];

fn is_blocking_call(code: &str) -> bool {
    BLOCKING_PATTERNS.iter().any(|p| code.contains(p))
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let files = production_sources();
    assert!(!files.is_empty(), "no production sources found");

    let violations = scan(&files, |lines, idx, code| {
        is_blocking_call(code) && enclosing_fn(lines, idx) == Some(FnKind::Async)
    });

    report(
        "BLOCKING I/O IN ASYNC CODE",
        &violations,
        &[
            "Use the async equivalents:",
            "  - tokio::fs instead of std::fs",
            "  - tokio::io::stdin()/stdout() with AsyncBufReadExt / AsyncWriteExt",
            "  - reqwest::Client instead of reqwest::blocking",
            "  - tokio::task::spawn_blocking when there is no async API",
        ],
    );
}

#[test]
fn test_blocking_detector() {
    assert!(is_blocking_call("let s = std::fs::read_to_string(path)?;"));
    assert!(is_blocking_call("let stdin = std::io::stdin();"));
    assert!(!is_blocking_call("let stdin = tokio::io::stdin();"));
    assert!(!is_blocking_call("let text = tokio::fs::read_to_string(path).await?;"));
}
