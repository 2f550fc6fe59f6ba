//! Tool registry — definitions exposed to the LLM and name → handler
//! dispatch.
//!
//! The tool set is closed: unknown names are an error the Coder reports
//! back to the model. Arguments arrive as loose JSON and are read with
//! per-field defaults; a missing required field surfaces as the handler's
//! own validation error.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use kestrel_domain::chat::ToolDefinition;
use kestrel_domain::config::{SHELL_TIMEOUT, TEST_TIMEOUT};

use crate::{file_ops, git, shell, validation};

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Execute a tool by name against the session cwd.
pub async fn dispatch_tool(cwd: &Path, name: &str, args: &Value) -> Result<Value, String> {
    match name {
        "shell" => {
            shell::run_shell(cwd, str_arg(args, "command").unwrap_or(""), SHELL_TIMEOUT).await
        }
        "list_dir" => file_ops::list_dir(cwd, str_arg(args, "path").unwrap_or(".")).await,
        "read_file" => file_ops::read_file(cwd, str_arg(args, "path").unwrap_or("")).await,
        "write_file" => {
            file_ops::write_file(
                cwd,
                str_arg(args, "path").unwrap_or(""),
                str_arg(args, "content").unwrap_or(""),
            )
            .await
        }
        "append_file" => {
            file_ops::append_file(
                cwd,
                str_arg(args, "path").unwrap_or(""),
                str_arg(args, "content").unwrap_or(""),
            )
            .await
        }
        "validate_syntax" => Ok(validation::validate_syntax(
            str_arg(args, "language").unwrap_or(""),
            str_arg(args, "content").unwrap_or(""),
        )),
        "run_tests" => {
            let timeout = args
                .get("timeout")
                .and_then(Value::as_u64)
                .map(Duration::from_secs)
                .unwrap_or(TEST_TIMEOUT);
            validation::run_tests(
                cwd,
                str_arg(args, "path"),
                str_arg(args, "filter"),
                str_arg(args, "framework"),
                timeout,
            )
            .await
        }
        "git_status" => {
            git::git_status(
                cwd,
                str_arg(args, "path").unwrap_or("."),
                args.get("include_diff").and_then(Value::as_bool).unwrap_or(false),
            )
            .await
        }
        "git_diff" => {
            git::git_diff(
                cwd,
                str_arg(args, "path"),
                args.get("staged").and_then(Value::as_bool).unwrap_or(false),
                str_arg(args, "commit"),
            )
            .await
        }
        other => Err(format!("unknown tool: {other}")),
    }
}

/// Derive success from a tool result: a present non-zero `exit_code`
/// means failure, everything else counts as success.
pub fn result_success(result: &Value) -> bool {
    match result.get("exit_code").and_then(Value::as_i64) {
        Some(code) => code == 0,
        None => true,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn def(name: &str, description: &str, parameters: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// The full tool surface exposed to the Coder.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        def(
            "shell",
            "Run a shell command in the session working directory.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to execute." }
                },
                "required": ["command"],
            }),
        ),
        def(
            "list_dir",
            "List entries in a directory relative to the session working directory.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative path to list." }
                },
                "required": ["path"],
            }),
        ),
        def(
            "read_file",
            "Read a file relative to the session working directory.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative file path to read." }
                },
                "required": ["path"],
            }),
        ),
        def(
            "write_file",
            "Write content to a file relative to the session working directory.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative file path to write." },
                    "content": { "type": "string", "description": "File content." }
                },
                "required": ["path", "content"],
            }),
        ),
        def(
            "append_file",
            "Append content to a file relative to the session working directory.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative file path to append to." },
                    "content": { "type": "string", "description": "Content to append." }
                },
                "required": ["path", "content"],
            }),
        ),
        def(
            "validate_syntax",
            "Validate code syntax before writing. Returns errors if invalid.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "language": { "type": "string", "description": "Language to validate (json, yaml, toml)." },
                    "content": { "type": "string", "description": "Code content to validate." }
                },
                "required": ["language", "content"],
            }),
        ),
        def(
            "run_tests",
            "Run tests and return structured results. Auto-detects test framework.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Test file or directory (optional)." },
                    "filter": { "type": "string", "description": "Test name pattern filter (optional)." },
                    "framework": { "type": "string", "description": "Test framework: pytest, jest, unittest, cargo (optional, auto-detected)." },
                    "timeout": { "type": "integer", "description": "Timeout in seconds (default: 120)." }
                },
            }),
        ),
        def(
            "git_status",
            "Get git status: branch, staged/modified/untracked files, ahead/behind count.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory to check (default: current)." },
                    "include_diff": { "type": "boolean", "description": "Include diff content (default: false)." }
                },
            }),
        ),
        def(
            "git_diff",
            "Show git diff for working directory or specific files.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File or directory to diff (optional)." },
                    "staged": { "type": "boolean", "description": "Show staged changes only (default: false)." },
                    "commit": { "type": "string", "description": "Compare against specific commit (optional)." }
                },
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn nine_tools_are_defined() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 9);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        for expected in [
            "shell",
            "list_dir",
            "read_file",
            "write_file",
            "append_file",
            "validate_syntax",
            "run_tests",
            "git_status",
            "git_diff",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn success_derived_from_exit_code() {
        assert!(result_success(&serde_json::json!({ "exit_code": 0 })));
        assert!(!result_success(&serde_json::json!({ "exit_code": 2 })));
        assert!(result_success(&serde_json::json!({ "path": "a.txt" })));
    }

    #[tokio::test]
    async fn dispatch_routes_to_handlers() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("f.txt"), "content").unwrap();

        let listed = dispatch_tool(ws.path(), "list_dir", &serde_json::json!({ "path": "." }))
            .await
            .unwrap();
        assert_eq!(listed["entries"][0].as_str().unwrap(), "f.txt");

        let read = dispatch_tool(ws.path(), "read_file", &serde_json::json!({ "path": "f.txt" }))
            .await
            .unwrap();
        assert_eq!(read["content"].as_str().unwrap(), "content");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_error() {
        let ws = TempDir::new().unwrap();
        let err = dispatch_tool(ws.path(), "rm_rf", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.contains("unknown tool"));
    }

    #[tokio::test]
    async fn dispatch_missing_required_arg_is_error() {
        let ws = TempDir::new().unwrap();
        assert!(dispatch_tool(ws.path(), "shell", &serde_json::json!({}))
            .await
            .is_err());
        assert!(dispatch_tool(ws.path(), "read_file", &serde_json::json!({}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn dispatch_validate_syntax_never_fails() {
        let ws = TempDir::new().unwrap();
        let result = dispatch_tool(
            ws.path(),
            "validate_syntax",
            &serde_json::json!({ "language": "json", "content": "not json" }),
        )
        .await
        .unwrap();
        assert!(!result["valid"].as_bool().unwrap());
    }
}
