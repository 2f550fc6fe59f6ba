//! File tools — confined, structured file I/O.
//!
//! All functions return `Result<Value, String>`; the JSON result goes back
//! to the model verbatim, so shapes stay stable.

use std::path::Path;

use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::confine::resolve_path;

/// List entries in a directory, sorted by name.
pub async fn list_dir(cwd: &Path, path: &str) -> Result<Value, String> {
    let resolved = resolve_path(cwd, path)?;
    if !resolved.is_dir() {
        return Err(format!("directory not found: {path}"));
    }

    let mut read_dir = fs::read_dir(&resolved)
        .await
        .map_err(|e| format!("failed to read directory '{path}': {e}"))?;

    let mut entries: Vec<String> = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| format!("failed to read directory entry: {e}"))?
    {
        entries.push(entry.file_name().to_string_lossy().to_string());
    }
    entries.sort();

    Ok(serde_json::json!({
        "path": path,
        "entries": entries,
    }))
}

/// Read a file as UTF-8, replacing invalid sequences.
pub async fn read_file(cwd: &Path, path: &str) -> Result<Value, String> {
    let resolved = resolve_path(cwd, path)?;
    if !resolved.is_file() {
        return Err(format!("file not found: {path}"));
    }

    let bytes = fs::read(&resolved)
        .await
        .map_err(|e| format!("failed to read '{path}': {e}"))?;
    let content = String::from_utf8_lossy(&bytes).into_owned();

    Ok(serde_json::json!({
        "path": path,
        "content": content,
    }))
}

/// Write a file, creating parent directories as needed.
pub async fn write_file(cwd: &Path, path: &str, content: &str) -> Result<Value, String> {
    let resolved = resolve_path(cwd, path)?;
    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create parent directory: {e}"))?;
    }

    fs::write(&resolved, content.as_bytes())
        .await
        .map_err(|e| format!("failed to write '{path}': {e}"))?;

    Ok(serde_json::json!({
        "path": path,
        "bytes_written": content.len(),
    }))
}

/// Append to a file, creating it (and parents) if missing.
pub async fn append_file(cwd: &Path, path: &str, content: &str) -> Result<Value, String> {
    let resolved = resolve_path(cwd, path)?;
    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create parent directory: {e}"))?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&resolved)
        .await
        .map_err(|e| format!("failed to open '{path}' for append: {e}"))?;

    file.write_all(content.as_bytes())
        .await
        .map_err(|e| format!("failed to append to '{path}': {e}"))?;
    file.flush()
        .await
        .map_err(|e| format!("failed to flush '{path}': {e}"))?;

    Ok(serde_json::json!({
        "path": path,
        "bytes_written": content.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let ws = TempDir::new().unwrap();
        let written = write_file(ws.path(), "notes/a.txt", "line one\nline two\n")
            .await
            .unwrap();
        assert_eq!(written["bytes_written"].as_u64().unwrap(), 18);

        let read = read_file(ws.path(), "notes/a.txt").await.unwrap();
        assert_eq!(read["content"].as_str().unwrap(), "line one\nline two\n");
    }

    #[tokio::test]
    async fn append_creates_and_accumulates() {
        let ws = TempDir::new().unwrap();
        append_file(ws.path(), "log.txt", "first\n").await.unwrap();
        append_file(ws.path(), "log.txt", "second\n").await.unwrap();

        let read = read_file(ws.path(), "log.txt").await.unwrap();
        assert_eq!(read["content"].as_str().unwrap(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn list_dir_sorted_entries() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("b.txt"), "").unwrap();
        std::fs::write(ws.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(ws.path().join("sub")).unwrap();

        let listed = list_dir(ws.path(), ".").await.unwrap();
        let entries: Vec<&str> = listed["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(entries, vec!["a.txt", "b.txt", "sub"]);
    }

    #[tokio::test]
    async fn list_dir_missing_is_error() {
        let ws = TempDir::new().unwrap();
        assert!(list_dir(ws.path(), "nope").await.is_err());
    }

    #[tokio::test]
    async fn read_outside_cwd_is_error() {
        let ws = TempDir::new().unwrap();
        let err = read_file(ws.path(), "../secret").await.unwrap_err();
        assert!(err.contains("escapes"));
    }
}
