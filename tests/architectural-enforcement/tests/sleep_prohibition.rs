//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the engine and console MUST NOT call
//! sleep methods. Deadlines use `tokio::time::timeout`, periodic work uses
//! `tokio::time::interval`, and everything else waits on I/O or channels.
//! **Exceptions**: test code (after `#[cfg(test)]`), interval-driven loops.

use architectural_enforcement::{code_part, scan};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|_, lines, idx| {
        is_sleep_call(lines[idx]) && !is_interval_pattern(lines, idx)
    });

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE:");
        eprintln!("  - Test code (#[cfg(test)] modules)");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep to 'wait' for a device reply (use the correlator)");
        eprintln!("  - Sleep as a connect or write timeout (use tokio::time::timeout)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn is_sleep_call(line: &str) -> bool {
    let code = code_part(line);
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

/// Check if this is the tokio::time::interval pattern (acceptable for periodic tasks)
fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    let start = current_idx.saturating_sub(20);
    let end = std::cmp::min(current_idx + 5, lines.len());

    lines[start..end]
        .iter()
        .any(|line| line.contains(".tick()") || line.contains("tokio::time::interval"))
}

#[test]
fn test_sleep_detection() {
    assert!(is_sleep_call("    tokio::time::sleep(Duration::from_millis(10)).await;"));
    assert!(is_sleep_call("    std::thread::sleep(d);"));
    assert!(!is_sleep_call("    // tokio::time::sleep(d).await;"));
    assert!(!is_sleep_call("    tokio::time::timeout(d, rx).await"));
}

#[test]
fn test_interval_detection() {
    let code = [
        "let mut ticker = tokio::time::interval(period);",
        "loop {",
        "    ticker.tick().await;",
        "    tokio::time::sleep(d).await;",
        "}",
    ];
    assert!(is_interval_pattern(&code, 3));
    assert!(!is_interval_pattern(&["fn f() {", "    std::thread::sleep(d);", "}"], 1));
}
