//! Git inspection tools — status and diff.
//!
//! Git failures here are non-fatal: the result carries an `error` field
//! instead of propagating, so the Coder can see what went wrong and adapt.

use std::path::Path;

use serde_json::Value;
use tokio::process::Command;

use crate::confine::resolve_path;

const MAX_STATUS_DIFF: usize = 3_000;
const MAX_DIFF: usize = 5_000;

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

async fn git(dir: &Path, args: &[&str]) -> Result<(i32, String), String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| format!("failed to run git: {e}"))?;
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    if !out.status.success() {
        text.push_str(&String::from_utf8_lossy(&out.stderr));
    }
    Ok((out.status.code().unwrap_or(-1), text))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// git_status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured `git status`: branch, staged/modified/untracked, ahead/behind.
pub async fn git_status(cwd: &Path, path: &str, include_diff: bool) -> Result<Value, String> {
    let dir = resolve_path(cwd, path)?;

    let status = async {
        let (code, branch_out) = git(&dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let branch = if code == 0 {
            branch_out.trim().to_string()
        } else {
            "unknown".to_string()
        };

        let (code, porcelain) = git(&dir, &["status", "--porcelain"]).await?;

        let mut staged: Vec<String> = Vec::new();
        let mut modified: Vec<String> = Vec::new();
        let mut untracked: Vec<String> = Vec::new();

        if code == 0 {
            for line in porcelain.lines() {
                if line.len() < 3 {
                    continue;
                }
                let codes: Vec<char> = line[..2].chars().collect();
                let file = line[3..].to_string();
                if codes[0] != ' ' && "MADRC".contains(codes[0]) {
                    staged.push(file.clone());
                }
                if "MD".contains(codes[1]) {
                    modified.push(file.clone());
                }
                if &line[..2] == "??" {
                    untracked.push(file);
                }
            }
        }

        let mut ahead = 0u64;
        let mut behind = 0u64;
        if let Ok((0, counts)) = git(
            &dir,
            &[
                "rev-list",
                "--left-right",
                "--count",
                &format!("{branch}...origin/{branch}"),
            ],
        )
        .await
        {
            let parts: Vec<&str> = counts.split_whitespace().collect();
            if parts.len() == 2 {
                ahead = parts[0].parse().unwrap_or(0);
                behind = parts[1].parse().unwrap_or(0);
            }
        }

        let mut result = serde_json::json!({
            "branch": branch,
            "clean": staged.is_empty() && modified.is_empty(),
            "staged": staged,
            "modified": modified,
            "untracked": untracked,
            "ahead": ahead,
            "behind": behind,
        });

        if include_diff {
            let (_, diff) = git(&dir, &["diff"]).await?;
            result["diff"] = Value::String(truncate(&diff, MAX_STATUS_DIFF));
        }

        Ok::<Value, String>(result)
    }
    .await;

    Ok(status.unwrap_or_else(|e| {
        serde_json::json!({
            "error": e,
            "branch": "unknown",
            "clean": false,
            "staged": [],
            "modified": [],
            "untracked": [],
        })
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// git_diff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `git diff`, optionally staged-only or against a specific commit.
pub async fn git_diff(
    cwd: &Path,
    path: Option<&str>,
    staged: bool,
    commit: Option<&str>,
) -> Result<Value, String> {
    let mut args: Vec<String> = vec!["diff".into()];
    if staged {
        args.push("--staged".into());
    }
    if let Some(commit) = commit {
        args.push(commit.to_string());
    }
    if let Some(path) = path {
        let resolved = resolve_path(cwd, path)?;
        args.push(resolved.to_string_lossy().into_owned());
    }

    let command = format!("git {}", args.join(" "));
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

    match git(cwd, &arg_refs).await {
        Ok((exit_code, output)) => Ok(serde_json::json!({
            "command": command,
            "exit_code": exit_code,
            "diff": truncate(&output, MAX_DIFF),
        })),
        Err(e) => Ok(serde_json::json!({
            "command": command,
            "error": e,
        })),
    }
}
