//! Task types shared between the Manager and the Coder.
//!
//! Plans and results travel as XML-ish tagged blocks inside model output;
//! the parsers here are deliberately forgiving — a missing tag falls back
//! to a defensible default rather than an error.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

/// A single task assigned by the Manager to the Coder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub success_criteria: String,
    /// Ids of tasks that must be completed before this one may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub retries: u32,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        success_criteria: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            success_criteria: success_criteria.into(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            result: None,
            errors: Vec::new(),
            retries: 0,
        }
    }
}

/// A plan produced by the Manager from user intent.
///
/// Invariant: the dependency graph over `tasks` is a DAG over ids present
/// in the plan (the Manager's execution order enforces this by skipping
/// tasks whose dependencies never completed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub intent: String,
    pub confidence: f32,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub needs_clarification: Option<String>,
}

impl TaskPlan {
    /// Single-task fallback plan echoing the raw request.
    pub fn fallback(user_text: &str) -> Self {
        Self {
            intent: user_text.to_string(),
            confidence: 0.5,
            tasks: vec![Task::new("1", user_text, "Task completed without errors")],
            needs_clarification: None,
        }
    }
}

/// Result reported by the Coder after task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub summary: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub tested: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tag_text<'a>(cell: &'static OnceLock<Regex>, pattern: &'static str, hay: &'a str) -> Option<&'a str> {
    re(cell, pattern)
        .captures(hay)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Parse a `<plan>` block from Manager output.
///
/// Returns `None` when no `<plan>` tag is present; callers substitute a
/// fallback plan.
pub fn parse_plan_xml(content: &str) -> Option<TaskPlan> {
    static PLAN: OnceLock<Regex> = OnceLock::new();
    static INTENT: OnceLock<Regex> = OnceLock::new();
    static CONF: OnceLock<Regex> = OnceLock::new();
    static CLARIFY: OnceLock<Regex> = OnceLock::new();
    static TASK: OnceLock<Regex> = OnceLock::new();
    static DESC: OnceLock<Regex> = OnceLock::new();
    static CRIT: OnceLock<Regex> = OnceLock::new();
    static DEPS: OnceLock<Regex> = OnceLock::new();

    let plan_text = tag_text(&PLAN, r"<plan>([\s\S]*?)</plan>", content)?;

    let intent = tag_text(&INTENT, r"<intent>([\s\S]*?)</intent>", plan_text)
        .unwrap_or_default()
        .to_string();

    let confidence = tag_text(&CONF, r"<confidence>([\d.]+)</confidence>", plan_text)
        .and_then(|s| s.parse::<f32>().ok())
        .unwrap_or(0.5);

    let needs_clarification = tag_text(&CLARIFY, r"<clarify>([\s\S]*?)</clarify>", plan_text)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut tasks = Vec::new();
    for caps in re(&TASK, r#"<task\s+id=["']?(\d+)["']?>([\s\S]*?)</task>"#).captures_iter(plan_text) {
        let id = caps[1].to_string();
        let body = &caps[2];

        let description = tag_text(&DESC, r"<description>([\s\S]*?)</description>", body)
            .unwrap_or_default()
            .to_string();
        let criteria = tag_text(&CRIT, r"<criteria>([\s\S]*?)</criteria>", body)
            .unwrap_or_default()
            .to_string();
        let dependencies = tag_text(&DEPS, r"<depends>([\s\S]*?)</depends>", body)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut task = Task::new(id, description, criteria);
        task.dependencies = dependencies;
        tasks.push(task);
    }

    Some(TaskPlan {
        intent,
        confidence,
        tasks,
        needs_clarification,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a `<result>` block from Coder output.
pub fn parse_result_xml(content: &str) -> Option<TaskResult> {
    static RESULT: OnceLock<Regex> = OnceLock::new();
    static STATUS: OnceLock<Regex> = OnceLock::new();
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    static FILES: OnceLock<Regex> = OnceLock::new();
    static TESTED: OnceLock<Regex> = OnceLock::new();
    static ERRORS: OnceLock<Regex> = OnceLock::new();

    let result_text = tag_text(&RESULT, r"<result>([\s\S]*?)</result>", content)?;

    let status = match tag_text(&STATUS, r"<status>([\s\S]*?)</status>", result_text)
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("success") | Some("completed") => TaskStatus::Completed,
        Some("partial") => TaskStatus::InProgress,
        _ => TaskStatus::Failed,
    };

    let summary = tag_text(&SUMMARY, r"<summary>([\s\S]*?)</summary>", result_text)
        .unwrap_or_default()
        .to_string();

    let files_changed = tag_text(&FILES, r"<files>([\s\S]*?)</files>", result_text)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let tested = matches!(
        tag_text(&TESTED, r"<tested>([\s\S]*?)</tested>", result_text)
            .map(str::to_lowercase)
            .as_deref(),
        Some("true") | Some("yes") | Some("1")
    );

    let errors = tag_text(&ERRORS, r"<errors>([\s\S]*?)</errors>", result_text)
        .filter(|s| !s.is_empty())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default();

    Some(TaskResult {
        status,
        summary,
        files_changed,
        tested,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plan_with_tasks_and_deps() {
        let content = r#"Some preamble.
<plan>
  <intent>Build a hello endpoint</intent>
  <confidence>0.85</confidence>
  <task id="1">
    <description>Create app.py</description>
    <criteria>File exists and imports cleanly</criteria>
    <depends></depends>
  </task>
  <task id="2">
    <description>Add a test</description>
    <criteria>pytest passes</criteria>
    <depends>1</depends>
  </task>
</plan>"#;

        let plan = parse_plan_xml(content).expect("plan should parse");
        assert_eq!(plan.intent, "Build a hello endpoint");
        assert!((plan.confidence - 0.85).abs() < f32::EPSILON);
        assert!(plan.needs_clarification.is_none());
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[0].id, "1");
        assert!(plan.tasks[0].dependencies.is_empty());
        assert_eq!(plan.tasks[1].dependencies, vec!["1".to_string()]);
    }

    #[test]
    fn parse_plan_with_clarification() {
        let content = "<plan><intent>?</intent><confidence>0.3</confidence><clarify>Which framework?</clarify></plan>";
        let plan = parse_plan_xml(content).unwrap();
        assert_eq!(plan.needs_clarification.as_deref(), Some("Which framework?"));
        assert!(plan.tasks.is_empty());
    }

    #[test]
    fn empty_clarify_tag_means_none() {
        let content = "<plan><intent>x</intent><clarify></clarify><task id=\"1\"><description>d</description><criteria>c</criteria></task></plan>";
        let plan = parse_plan_xml(content).unwrap();
        assert!(plan.needs_clarification.is_none());
    }

    #[test]
    fn missing_plan_tag_returns_none() {
        assert!(parse_plan_xml("just prose, no plan").is_none());
    }

    #[test]
    fn missing_confidence_defaults() {
        let plan = parse_plan_xml("<plan><intent>x</intent></plan>").unwrap();
        assert!((plan.confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn parse_result_success() {
        let content = r#"<result>
  <status>success</status>
  <summary>Created app.py with a /hello route</summary>
  <files>app.py, test_app.py</files>
  <tested>true</tested>
  <errors></errors>
</result>"#;
        let result = parse_result_xml(content).unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.files_changed, vec!["app.py", "test_app.py"]);
        assert!(result.tested);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn parse_result_status_mapping() {
        for (raw, expected) in [
            ("success", TaskStatus::Completed),
            ("completed", TaskStatus::Completed),
            ("partial", TaskStatus::InProgress),
            ("failed", TaskStatus::Failed),
            ("error", TaskStatus::Failed),
            ("garbage", TaskStatus::Failed),
        ] {
            let content = format!("<result><status>{raw}</status></result>");
            assert_eq!(parse_result_xml(&content).unwrap().status, expected, "{raw}");
        }
    }

    #[test]
    fn parse_result_with_errors() {
        let content = "<result><status>failed</status><errors>pytest exited 1</errors></result>";
        let result = parse_result_xml(content).unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.errors, vec!["pytest exited 1"]);
        assert!(!result.tested);
    }

    #[test]
    fn fallback_plan_shape() {
        let plan = TaskPlan::fallback("fix the tests");
        assert_eq!(plan.intent, "fix the tests");
        assert!((plan.confidence - 0.5).abs() < f32::EPSILON);
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].id, "1");
    }
}
