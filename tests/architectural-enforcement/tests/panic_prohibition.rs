//! Panic Prohibition Test
//!
//! Production code propagates errors with `?` and typed errors; a panic in
//! the generation task would leave a turn half-applied until the next
//! operation recovers it. Tests are free to unwrap.

use architectural_enforcement::{production_sources, report, scan};

fn is_panicking_call(code: &str) -> bool {
    code.contains(".unwrap()") || code.contains(".expect(")
}

#[test]
fn test_no_unwrap_in_production_code() {
    let files = production_sources();
    assert!(!files.is_empty(), "no production sources found");

    let violations = scan(&files, |_, _, code| is_panicking_call(code));

    report(
        "UNWRAP / EXPECT IN PRODUCTION CODE",
        &violations,
        &[
            "Propagate instead:",
            "  - `?` with a thiserror variant (GenerateError, BackendError, ConfigError)",
            "  - anyhow::Context in the CLI",
            "  - unwrap_or / unwrap_or_default / unwrap_or_else for real defaults",
        ],
    );
}

#[test]
fn test_panic_detector() {
    assert!(is_panicking_call("let x = y.unwrap();"));
    assert!(is_panicking_call("let x = y.expect(\"present\");"));
    assert!(!is_panicking_call("let x = y.unwrap_or_default();"));
    assert!(!is_panicking_call("let x = y.unwrap_or(0);"));
}
