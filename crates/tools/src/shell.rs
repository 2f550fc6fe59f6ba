//! Shell tool — run a command in the session working directory.
//!
//! The command inherits the cwd but is not otherwise confined; the
//! deployment boundary is the container the executor runs in. Timeouts
//! come back as a structured result (`exit_code: -1`), never an error, so
//! the Coder's retry contract holds.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;

use kestrel_domain::config::SHELL_TIMEOUT;

/// Run `sh -c <command>` with merged stdout+stderr.
pub async fn run_shell(cwd: &Path, command: &str, timeout: Duration) -> Result<Value, String> {
    if command.is_empty() {
        return Err("command is required".to_owned());
    }

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(out)) => {
            let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
            output.push_str(&String::from_utf8_lossy(&out.stderr));
            Ok(serde_json::json!({
                "command": command,
                "exit_code": out.status.code().unwrap_or(-1),
                "output": output.trim(),
            }))
        }
        Ok(Err(e)) => Err(format!("failed to spawn '{command}': {e}")),
        Err(_) => {
            tracing::warn!(command, timeout_secs = timeout.as_secs(), "shell command timed out");
            Ok(serde_json::json!({
                "command": command,
                "exit_code": -1,
                "output": format!(
                    "Command timed out after {} seconds. Long-running servers should be started with '&' to run in background.",
                    timeout.as_secs()
                ),
            }))
        }
    }
}

/// Run with the default 60 s timeout.
pub async fn run_shell_default(cwd: &Path, command: &str) -> Result<Value, String> {
    run_shell(cwd, command, SHELL_TIMEOUT).await
}
