//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in the engine and console MUST NOT use
//! blocking I/O. Use `tokio::fs` and `tokio::net` inside async code.
//! **Acceptable**: blocking calls in plain functions that run before the
//! runtime is busy (configuration loading), and test code.

use architectural_enforcement::{code_part, scan};

const BLOCKING_PATTERNS: [&str; 6] = [
    "std::fs::",
    "std::net::",
    "std::thread::sleep",
    "std::os::unix::net::",
    "std::process::Command",
    "std::io::stdin",
];

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(|_, lines, idx| {
        is_blocking_call(lines[idx]) && enclosing_fn_is_async(lines, idx)
    });

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read_dir().await, tokio::fs::read_to_string().await");
        eprintln!("  - tokio::net::UnixStream::connect().await");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn is_blocking_call(line: &str) -> bool {
    let code = code_part(line);
    BLOCKING_PATTERNS.iter().any(|pattern| code.contains(pattern))
}

/// Walk back to the nearest function signature and report whether it is async
fn enclosing_fn_is_async(lines: &[&str], current_idx: usize) -> bool {
    for line in lines[..=current_idx].iter().rev() {
        let code = code_part(line);
        if code.contains("fn ") {
            return code.contains("async fn ") || code.contains("async move");
        }
        if code.contains("async move {") || code.contains("async {") {
            return true;
        }
    }
    false
}

#[test]
fn test_blocking_detection() {
    let code = [
        "pub async fn list(dir: &Path) -> Vec<PathBuf> {",
        "    let entries = std::fs::read_dir(dir);",
        "}",
        "pub fn load(path: &Path) -> String {",
        "    std::fs::read_to_string(path).unwrap_or_default()",
        "}",
    ];
    assert!(is_blocking_call(code[1]));
    assert!(enclosing_fn_is_async(&code, 1));
    assert!(is_blocking_call(code[4]));
    assert!(!enclosing_fn_is_async(&code, 4));
}

#[test]
fn test_spawned_block_counts_as_async() {
    let code = [
        "fn start(&self) {",
        "    tokio::spawn(async move {",
        "        let s = std::net::TcpStream::connect(addr);",
        "    });",
        "}",
    ];
    assert!(enclosing_fn_is_async(&code, 2));
}
