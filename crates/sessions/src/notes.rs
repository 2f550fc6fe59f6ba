//! Daily markdown notes.
//!
//! Every recorded summary appends a human-readable section to
//! `.kestrel/notes/<branch>/<YYYY-MM-DD>.md`: the triggering request, the
//! last planning block, a checklist of tool calls, the summary prose, and
//! Obsidian-style links to changed code files.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use kestrel_domain::error::{Error, Result};

/// One tool invocation, as rendered into the checklist.
#[derive(Debug, Clone)]
pub struct ToolCallNote {
    pub tool_name: String,
    pub success: bool,
    pub duration_ms: Option<u64>,
}

/// The material gathered for one interaction's note section.
#[derive(Debug, Default)]
pub struct NoteSection {
    pub user_request: Option<String>,
    pub planning: Option<String>,
    pub tool_calls: Vec<ToolCallNote>,
    pub summary: String,
    pub files_changed: Vec<String>,
}

/// Extensions that get an Obsidian link in the files list.
const CODE_EXTENSIONS: &[&str] = &[
    "py", "rs", "js", "ts", "tsx", "jsx", "go", "java", "rb", "c", "cpp", "h",
    "html", "css", "json", "yaml", "yml", "toml", "md", "sh", "sql",
];

fn is_code_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| CODE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Render one section of markdown.
fn render_section(section: &NoteSection) -> String {
    let mut out = String::new();
    out.push_str(&format!("## {}\n\n", Utc::now().format("%H:%M:%S UTC")));

    if let Some(request) = &section.user_request {
        out.push_str(&format!("**Request:** {}\n\n", request.trim()));
    }

    if let Some(planning) = &section.planning {
        out.push_str("**Plan:**\n");
        for line in planning.trim().lines() {
            out.push_str(&format!("> {line}\n"));
        }
        out.push('\n');
    }

    if !section.tool_calls.is_empty() {
        out.push_str("**Tool calls:**\n");
        for call in &section.tool_calls {
            let mark = if call.success { "x" } else { " " };
            match call.duration_ms {
                Some(ms) => out.push_str(&format!("- [{mark}] {} ({ms} ms)\n", call.tool_name)),
                None => out.push_str(&format!("- [{mark}] {}\n", call.tool_name)),
            }
        }
        out.push('\n');
    }

    out.push_str(&format!("**Summary:**\n{}\n", section.summary.trim()));

    let linked: Vec<&String> = section
        .files_changed
        .iter()
        .filter(|f| is_code_file(f))
        .collect();
    if !linked.is_empty() {
        out.push_str("\n**Files:**\n");
        for file in linked {
            out.push_str(&format!("- [[{file}]]\n"));
        }
    }

    out.push('\n');
    out
}

/// Append a section to today's notes file, creating the file (with a
/// header) and its directories on first write. Returns the file path.
pub fn append_summary_note(notes_branch_dir: &Path, section: &NoteSection) -> Result<PathBuf> {
    std::fs::create_dir_all(notes_branch_dir).map_err(Error::Io)?;

    let date = Utc::now().format("%Y-%m-%d").to_string();
    let path = notes_branch_dir.join(format!("{date}.md"));
    let fresh = !path.exists();

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(Error::Io)?;

    if fresh {
        file.write_all(format!("# Kestrel notes — {date}\n\n").as_bytes())
            .map_err(Error::Io)?;
    }
    file.write_all(render_section(section).as_bytes())
        .map_err(Error::Io)?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_section() -> NoteSection {
        NoteSection {
            user_request: Some("add a hello endpoint".into()),
            planning: Some("1. write app.py\n2. run tests".into()),
            tool_calls: vec![
                ToolCallNote {
                    tool_name: "write_file".into(),
                    success: true,
                    duration_ms: Some(12),
                },
                ToolCallNote {
                    tool_name: "run_tests".into(),
                    success: false,
                    duration_ms: None,
                },
            ],
            summary: "Wrote app.py; tests still failing.".into(),
            files_changed: vec!["app.py".into(), "README".into(), "style.css".into()],
        }
    }

    #[test]
    fn first_write_creates_header_and_section() {
        let dir = TempDir::new().unwrap();
        let path = append_summary_note(dir.path(), &sample_section()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Kestrel notes —"));
        assert!(content.contains("**Request:** add a hello endpoint"));
        assert!(content.contains("> 1. write app.py"));
        assert!(content.contains("- [x] write_file (12 ms)"));
        assert!(content.contains("- [ ] run_tests"));
        assert!(content.contains("Wrote app.py"));
    }

    #[test]
    fn second_write_appends_without_second_header() {
        let dir = TempDir::new().unwrap();
        append_summary_note(dir.path(), &sample_section()).unwrap();
        let path = append_summary_note(dir.path(), &sample_section()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("# Kestrel notes —").count(), 1);
        assert_eq!(content.matches("**Summary:**").count(), 2);
    }

    #[test]
    fn only_code_files_get_links() {
        let dir = TempDir::new().unwrap();
        let path = append_summary_note(dir.path(), &sample_section()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[[app.py]]"));
        assert!(content.contains("[[style.css]]"));
        assert!(!content.contains("[[README]]"));
    }

    #[test]
    fn section_without_extras_renders_summary_only() {
        let dir = TempDir::new().unwrap();
        let section = NoteSection {
            summary: "Just a recap.".into(),
            ..Default::default()
        };
        let path = append_summary_note(dir.path(), &section).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Just a recap."));
        assert!(!content.contains("**Tool calls:**"));
        assert!(!content.contains("**Files:**"));
    }
}
