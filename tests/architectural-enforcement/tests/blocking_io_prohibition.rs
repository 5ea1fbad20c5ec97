//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async client code MUST NOT use blocking I/O.
//! **Required**: `tokio::net`, `tokio::io`, async `reqwest`.
//!
//! Configuration loading runs before the runtime drives any turn and may read
//! files synchronously, so file rules only apply inside `async fn`.

use architectural_enforcement::{scan_production, Rule};

const RULES: &[Rule] = &[
    Rule {
        name: "Blocking HTTP client",
        pattern: "reqwest::blocking",
        async_only: false,
    },
    Rule {
        name: "Blocking network I/O",
        pattern: "std::net::",
        async_only: false,
    },
    Rule {
        name: "Blocking file I/O",
        pattern: "std::fs::",
        async_only: true,
    },
    Rule {
        name: "Blocking stdin in async",
        pattern: "std::io::stdin()",
        async_only: true,
    },
    Rule {
        name: "Blocking process I/O",
        pattern: "std::process::Command",
        async_only: false,
    },
];

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = scan_production(RULES);

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::net, tokio::io and async reqwest instead.");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}
