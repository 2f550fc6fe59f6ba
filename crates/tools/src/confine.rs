//! Path confinement for tool inputs.
//!
//! Every path handed to a file tool is resolved against the session's
//! working directory and must remain a descendant of it after symlink
//! resolution. Absolute inputs are accepted only when they already resolve
//! inside the working directory.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Validate and resolve a requested path within the session cwd.
///
/// Returns the resolved absolute path, or a human-readable error the model
/// can act on.
pub fn resolve_path(cwd: &Path, requested: &str) -> Result<PathBuf, String> {
    if requested.is_empty() {
        return Err("path is required".to_owned());
    }

    let canonical_cwd = cwd
        .canonicalize()
        .map_err(|e| format!("cannot resolve working directory '{}': {e}", cwd.display()))?;

    let requested_path = Path::new(requested);
    let candidate = if requested_path.is_absolute() {
        requested_path.to_path_buf()
    } else {
        canonical_cwd.join(requested_path)
    };

    // Canonicalize the longest existing prefix, then re-append the
    // non-existent tail so new files can still be confinement-checked.
    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        let mut existing = candidate.as_path();
        let mut tail: Vec<OsString> = Vec::new();
        while !existing.exists() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(name.to_owned());
                    existing = parent;
                }
                _ => break,
            }
        }
        let mut resolved = existing
            .canonicalize()
            .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
        for part in tail.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_cwd) {
        return Err(format!("path '{requested}' escapes the working directory"));
    }

    Ok(resolved)
}
