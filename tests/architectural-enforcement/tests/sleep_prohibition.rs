//! Sleep Prohibition Test
//!
//! Replies must arrive as fast as the backend produces them, so production
//! code never waits on a fixed delay.
//!
//! ## Allowed
//! - `tokio::time::interval` tickers (the dev backend paces its output this way)
//! - Exponential backoff in retry loops
//! - Anything inside `#[cfg(test)]` modules
//!
//! ## Prohibited
//! - `std::thread::sleep` anywhere
//! - `tokio::time::sleep` used for polling or pacing

use architectural_enforcement::{
    is_backoff_context, is_interval_pattern, production_sources, report, scan,
};

fn is_sleep_call(code: &str) -> bool {
    code.contains("thread::sleep(") || code.contains("time::sleep(") || code.contains(" sleep(")
}

#[test]
fn test_no_sleep_in_production_code() {
    let files = production_sources();
    assert!(!files.is_empty(), "no production sources found");

    let violations = scan(&files, |lines, idx, code| {
        if !is_sleep_call(code) {
            return false;
        }
        if code.contains("thread::sleep(") {
            return true;
        }
        !is_interval_pattern(lines, idx) && !is_backoff_context(lines, idx)
    });

    report(
        "SLEEP VIOLATIONS DETECTED",
        &violations,
        &[
            "Use reactive patterns instead:",
            "  - tokio::select! on the stop signal or a channel",
            "  - tokio::time::interval for pacing",
            "  - Notify / oneshot for completion",
        ],
    );
}

#[test]
fn test_sleep_detector() {
    assert!(is_sleep_call("    tokio::time::sleep(Duration::from_millis(10)).await;"));
    assert!(is_sleep_call("    std::thread::sleep(d);"));
    assert!(!is_sleep_call("    ticker.tick().await;"));
    assert!(!is_sleep_call("    let asleep = false;"));
}
