//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep. Streams wait on I/O, bounded
//! by `tokio::time::timeout` where a limit applies.
//! **Exceptions**: test code

use architectural_enforcement::{scan_production, Rule};

const RULES: &[Rule] = &[
    Rule {
        name: "Blocking sleep",
        pattern: "thread::sleep",
        async_only: false,
    },
    Rule {
        name: "Async sleep",
        pattern: "time::sleep(",
        async_only: false,
    },
];

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_production(RULES);

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nWait on the frame channel or use tokio::time::timeout.");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}
