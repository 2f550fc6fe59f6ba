//! Validation tools — syntax checking and test execution.
//!
//! These exist so the Coder can verify its own output before reporting
//! success: `validate_syntax` catches malformed config/code payloads
//! before they hit disk, `run_tests` gives structured pass/fail counts.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::shell::run_shell;

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// validate_syntax
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn syntax_error(line: u64, column: u64, message: impl Into<String>) -> Value {
    serde_json::json!({
        "line": line,
        "column": column,
        "message": message.into(),
    })
}

fn line_col_at(content: &str, offset: usize) -> (u64, u64) {
    let prefix = &content[..offset.min(content.len())];
    let line = prefix.bytes().filter(|b| *b == b'\n').count() as u64 + 1;
    let column = prefix
        .rsplit('\n')
        .next()
        .map(|tail| tail.len() as u64 + 1)
        .unwrap_or(1);
    (line, column)
}

/// Validate code/config syntax without touching disk.
///
/// Supports json, yaml, and toml. Unknown languages come back
/// `valid: true` with a warning so the Coder is not blocked by a language
/// we cannot check.
pub fn validate_syntax(language: &str, content: &str) -> Value {
    let language = language.trim().to_lowercase();
    let mut errors: Vec<Value> = Vec::new();

    match language.as_str() {
        "json" => {
            if let Err(e) = serde_json::from_str::<Value>(content) {
                errors.push(syntax_error(e.line() as u64, e.column() as u64, e.to_string()));
            }
        }
        "yaml" | "yml" => {
            if let Err(e) = serde_yaml::from_str::<serde_yaml::Value>(content) {
                let (line, column) = e
                    .location()
                    .map(|loc| (loc.line() as u64, loc.column() as u64))
                    .unwrap_or((1, 1));
                errors.push(syntax_error(line, column, e.to_string()));
            }
        }
        "toml" => {
            if let Err(e) = toml::from_str::<toml::Value>(content) {
                let (line, column) = e
                    .span()
                    .map(|span| line_col_at(content, span.start))
                    .unwrap_or((1, 1));
                errors.push(syntax_error(line, column, e.message()));
            }
        }
        _ => {
            return serde_json::json!({
                "valid": true,
                "language": language,
                "errors": [],
                "warnings": [format!("Syntax validation not implemented for {language}")],
            });
        }
    }

    serde_json::json!({
        "valid": errors.is_empty(),
        "language": language,
        "errors": errors,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Any top-level `test_*.py` marks a pytest project even without config.
fn has_pytest_files(cwd: &Path) -> bool {
    let Ok(read_dir) = std::fs::read_dir(cwd) else {
        return false;
    };
    read_dir.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.starts_with("test_") && name.ends_with(".py")
    })
}

/// Resolve the test command from the framework hint or project layout.
fn detect_test_command(cwd: &Path, framework: Option<&str>) -> String {
    if let Some(framework) = framework {
        match framework.to_lowercase().as_str() {
            "pytest" => return "pytest".into(),
            "jest" => return "npm test".into(),
            "unittest" => return "python -m unittest".into(),
            "cargo" => return "cargo test".into(),
            _ => {}
        }
    }

    if cwd.join("Cargo.toml").exists() {
        "cargo test".into()
    } else if cwd.join("pytest.ini").exists() || cwd.join("pyproject.toml").exists() {
        "pytest".into()
    } else if cwd.join("package.json").exists() {
        "npm test".into()
    } else if has_pytest_files(cwd) {
        "pytest".into()
    } else {
        "pytest".into()
    }
}

const MAX_TEST_OUTPUT: usize = 2_000;
const MAX_FAILURES: usize = 5;
const MAX_FAILURE_NAME: usize = 100;

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn parse_counts(output: &str) -> (u64, u64, u64) {
    static PASSED: OnceLock<Regex> = OnceLock::new();
    static FAILED: OnceLock<Regex> = OnceLock::new();
    static SKIPPED: OnceLock<Regex> = OnceLock::new();

    let count = |cell: &'static OnceLock<Regex>, pat: &'static str| {
        re(cell, pat)
            .captures(output)
            .and_then(|c| c[1].parse::<u64>().ok())
            .unwrap_or(0)
    };

    (
        count(&PASSED, r"(?i)(\d+)\s+passed"),
        count(&FAILED, r"(?i)(\d+)\s+failed"),
        count(&SKIPPED, r"(?i)(\d+)\s+(?:skipped|ignored)"),
    )
}

fn parse_failures(output: &str) -> Vec<Value> {
    static PYTEST_FAIL: OnceLock<Regex> = OnceLock::new();
    static CARGO_FAIL: OnceLock<Regex> = OnceLock::new();

    let mut failures = Vec::new();
    for caps in re(&PYTEST_FAIL, r"(?m)^FAILED\s+(\S+)").captures_iter(output) {
        failures.push(serde_json::json!({
            "name": truncate(&caps[1], MAX_FAILURE_NAME),
        }));
    }
    for caps in re(&CARGO_FAIL, r"(?m)^test (\S+) \.\.\. FAILED").captures_iter(output) {
        failures.push(serde_json::json!({
            "name": truncate(&caps[1], MAX_FAILURE_NAME),
        }));
    }
    failures.truncate(MAX_FAILURES);
    failures
}

/// Run the project's tests and return structured results.
pub async fn run_tests(
    cwd: &Path,
    path: Option<&str>,
    filter: Option<&str>,
    framework: Option<&str>,
    timeout: Duration,
) -> Result<Value, String> {
    let mut test_cmd = detect_test_command(cwd, framework);

    if let Some(path) = path {
        // Confinement: the path rides into a shell command, so check it first.
        crate::confine::resolve_path(cwd, path)?;
        test_cmd = format!("{test_cmd} {path}");
    }
    if let Some(filter) = filter {
        if test_cmd.contains("pytest") {
            test_cmd = format!("{test_cmd} -k '{filter}'");
        } else if test_cmd.contains("cargo") {
            test_cmd = format!("{test_cmd} {filter}");
        } else if test_cmd.contains("npm") {
            test_cmd = format!("{test_cmd} -- --testNamePattern='{filter}'");
        }
    }
    if test_cmd.contains("pytest") {
        test_cmd = format!("{test_cmd} --tb=short -q");
    }

    let shell_result = run_shell(cwd, &test_cmd, timeout).await?;
    let exit_code = shell_result["exit_code"].as_i64().unwrap_or(-1);
    let output = shell_result["output"].as_str().unwrap_or("").to_string();

    if exit_code == -1 && output.contains("timed out") {
        return Ok(serde_json::json!({
            "command": test_cmd,
            "exit_code": -1,
            "error": format!("Test execution timed out after {} seconds", timeout.as_secs()),
            "passed": 0,
            "failed": 0,
            "skipped": 0,
            "failures": [],
        }));
    }

    let (passed, failed, skipped) = parse_counts(&output);
    let failures = parse_failures(&output);

    Ok(serde_json::json!({
        "command": test_cmd,
        "exit_code": exit_code,
        "passed": passed,
        "failed": failed,
        "skipped": skipped,
        "failures": failures,
        "output": truncate(&output, MAX_TEST_OUTPUT),
    }))
}
