//! Architectural Enforcement
//!
//! Source scanners backing the integration tests in `tests/`:
//! - No blocking I/O in async client code
//! - No sleep in production code (wait on I/O or timeouts instead)
//!
//! Scanning is line-based. Everything from the first `#[cfg(test)]` in a file
//! onwards is treated as test code and skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees under enforcement, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["client/core/src", "client/cli/src"];

/// A forbidden pattern found in production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the match
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Rule that matched
    pub rule: &'static str,
    /// Trimmed source line
    pub source: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.source
        )
    }
}

/// A pattern to reject and the rule name reported for it
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Reported rule name
    pub name: &'static str,
    /// Substring that triggers the rule
    pub pattern: &'static str,
    /// Only flag matches inside an `async fn`
    pub async_only: bool,
}

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from("../.."))
}

/// All `.rs` files below the production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// Code portion of each production line, with its 1-based number
///
/// Line comments are stripped and scanning stops at the test module.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }
        let code = line.split("//").next().unwrap_or(line);
        lines.push((idx + 1, code));
    }
    lines
}

/// Whether the line at `position` sits inside an `async fn`
///
/// Scans backwards to the nearest function signature.
#[must_use]
pub fn is_in_async_function(lines: &[(usize, &str)], position: usize) -> bool {
    for (_, line) in lines[..position].iter().rev() {
        let line = line.trim();
        if line.contains("async fn ") || line.contains("async move") {
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

/// Apply `rules` to one file's content
#[must_use]
pub fn scan_source(path: &Path, content: &str, rules: &[Rule]) -> Vec<Violation> {
    let lines = production_lines(content);
    let mut violations = Vec::new();

    for (position, (line_number, code)) in lines.iter().enumerate() {
        for rule in rules {
            if !code.contains(rule.pattern) {
                continue;
            }
            if rule.async_only && !is_in_async_function(&lines, position) {
                continue;
            }
            violations.push(Violation {
                path: path.to_path_buf(),
                line: *line_number,
                rule: rule.name,
                source: content
                    .lines()
                    .nth(line_number - 1)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            });
        }
    }
    violations
}

/// Apply `rules` to every production file
#[must_use]
pub fn scan_production(rules: &[Rule]) -> Vec<Violation> {
    production_files()
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok().map(|c| (path, c)))
        .flat_map(|(path, content)| scan_source(path, &content, rules))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLEEP: Rule = Rule {
        name: "Sleep",
        pattern: "thread::sleep",
        async_only: false,
    };

    const STD_FS: Rule = Rule {
        name: "Blocking file I/O",
        pattern: "std::fs::",
        async_only: true,
    };

    #[test]
    fn test_stops_at_test_module() {
        let source = "fn a() {}\n#[cfg(test)]\nmod tests { fn b() { std::thread::sleep(d); } }\n";
        let violations = scan_source(Path::new("x.rs"), source, &[SLEEP]);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_comment_is_not_code() {
        let source = "fn a() {\n    // std::thread::sleep is forbidden\n}\n";
        assert!(scan_source(Path::new("x.rs"), source, &[SLEEP]).is_empty());
    }

    #[test]
    fn test_async_only_rule() {
        let source = "fn load() {\n    std::fs::read(p);\n}\nasync fn run() {\n    std::fs::read(p);\n}\n";
        let violations = scan_source(Path::new("x.rs"), source, &[STD_FS]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 5);
    }

    #[test]
    fn test_production_files_found() {
        let files = production_files();
        assert!(files.iter().any(|p| p.ends_with("client/core/src/lib.rs")));
    }
}
