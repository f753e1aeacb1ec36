//! Architectural Enforcement
//!
//! Source scanners behind the integration tests in `tests/`:
//! - No sleep calls in production code
//! - No blocking I/O inside async functions
//! - No `unwrap()` / `expect()` in production code
//!
//! Production code is everything under the crates' `src/` directories up to
//! the first `#[cfg(test)]` of each file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Source directories scanned, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["parlor/core/src", "parlor/cli/src"];

/// A rule violation at one line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Production part of one source file
#[derive(Clone, Debug)]
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,
    /// Lines before the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Keep only the lines before the test module
    pub fn from_source(path: PathBuf, content: &str) -> Self {
        let lines = content
            .lines()
            .take_while(|l| !l.trim().starts_with("#[cfg(test)]"))
            .map(str::to_string)
            .collect();
        Self { path, lines }
    }

    /// Lines as string slices, for the context helpers
    pub fn line_refs(&self) -> Vec<&str> {
        self.lines.iter().map(String::as_str).collect()
    }
}

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every production source file in [`PRODUCTION_DIRS`]
///
/// Panics if a directory is missing, so a moved crate cannot silently pass.
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.exists(), "missing source directory {}", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(entry.path()) {
                files.push(SourceFile::from_source(entry.path().to_path_buf(), &content));
            }
        }
    }

    files
}

/// Run `check` over every code line, collecting the lines it flags
pub fn scan(files: &[SourceFile], check: impl Fn(&[&str], usize, &str) -> bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    for file in files {
        let lines = file.line_refs();
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if code.trim().is_empty() {
                continue;
            }
            if check(&lines, idx, code) {
                violations.push(Violation {
                    path: file.path.clone(),
                    line: idx + 1,
                    text: line.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Print violations with guidance and fail
pub fn report(title: &str, violations: &[Violation], guidance: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in guidance {
        eprintln!("  {line}");
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

/// The line without a trailing `//` comment
pub fn code_part(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") {
        return "";
    }
    line.split("//").next().unwrap_or(line)
}

/// Kind of the nearest enclosing function
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnKind {
    /// `async fn`
    Async,
    /// Plain `fn`
    Sync,
}

/// Find the function a line belongs to by scanning backwards
pub fn enclosing_fn(lines: &[&str], current_idx: usize) -> Option<FnKind> {
    for i in (0..=current_idx).rev() {
        let line = lines[i].trim();
        if is_fn_declaration(line) {
            return Some(if line.contains("async fn ") {
                FnKind::Async
            } else {
                FnKind::Sync
            });
        }

        // Stop at module boundaries
        if line.starts_with("mod ") || (line.starts_with("impl") && line.ends_with('{')) {
            return None;
        }
    }
    None
}

fn is_fn_declaration(line: &str) -> bool {
    let rest = line
        .strip_prefix("pub(crate) ")
        .or_else(|| line.strip_prefix("pub "))
        .unwrap_or(line);
    let rest = rest.strip_prefix("async ").unwrap_or(rest);
    rest.starts_with("fn ")
}

/// Whether the line sits next to a `tokio::time::interval` ticker
pub fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    let start = current_idx.saturating_sub(20);
    let end = std::cmp::min(current_idx + 5, lines.len());
    lines[start..end]
        .iter()
        .any(|l| l.contains("interval(") || l.contains(".tick()"))
}

/// Whether the surrounding lines compute an exponential retry delay
pub fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let start = current_idx.saturating_sub(15);
    let end = std::cmp::min(current_idx + 5, lines.len());

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;
    for line in &lines[start..end] {
        let line = line.to_lowercase();
        if line.contains("<<") || line.contains("pow") || line.contains("* 2") {
            has_backoff_calc = true;
        }
        if line.contains("retry") || line.contains("backoff") || line.contains("attempt") {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_stops_at_test_module() {
        let file = SourceFile::from_source(
            PathBuf::from("x.rs"),
            "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() { x.unwrap(); }\n}\n",
        );
        assert_eq!(file.lines, vec!["fn a() {}".to_string()]);
    }

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("    // tokio::time::sleep(d)"), "");
        assert_eq!(code_part("let x = 1; // note"), "let x = 1; ");
    }

    #[test]
    fn test_enclosing_fn() {
        let code = vec![
            "impl Foo {",
            "    pub async fn run(&self) {",
            "        work().await;",
            "    }",
            "    fn load() {",
            "        std::fs::read_to_string(p);",
            "    }",
            "}",
        ];
        assert_eq!(enclosing_fn(&code, 2), Some(FnKind::Async));
        assert_eq!(enclosing_fn(&code, 5), Some(FnKind::Sync));
        assert_eq!(enclosing_fn(&code, 0), None);
    }

    #[test]
    fn test_backoff_detection() {
        let code = vec![
            "fn reconnect() {",
            "    let delay = base_delay * (1 << attempt);",
            "    tokio::time::sleep(Duration::from_millis(delay)).await;",
            "}",
        ];
        assert!(is_backoff_context(&code, 2));
    }

    #[test]
    fn test_interval_detection() {
        let code = vec![
            "let mut ticker = tokio::time::interval(period);",
            "loop {",
            "    ticker.tick().await;",
            "}",
        ];
        assert!(is_interval_pattern(&code, 2));
    }

    #[test]
    fn test_scan_reports_line_numbers() {
        let files = vec![SourceFile::from_source(
            PathBuf::from("src/x.rs"),
            "fn a() {\n    b.unwrap();\n}\n",
        )];
        let violations = scan(&files, |_, _, code| code.contains(".unwrap()"));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 2);
        assert_eq!(violations[0].to_string(), "src/x.rs:2 - b.unwrap();");
    }
}
