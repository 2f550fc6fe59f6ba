//! Manager agent — intent decomposition, dispatch, retry, summary.
//!
//! The Manager turns one user request into a dependency-ordered plan,
//! runs each task through the Coder (retrying with failure context), and
//! closes with a summary event. A failed task does not abort the request;
//! only tasks depending on it are skipped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use kestrel_domain::chat::ChatMessage;
use kestrel_domain::error::Result;
use kestrel_domain::session::AgentSession;
use kestrel_domain::task::{parse_plan_xml, parse_result_xml, Task, TaskPlan, TaskResult, TaskStatus};
use kestrel_providers::ChatProvider;

use crate::cancel::CancelToken;
use crate::coder::CoderAgent;
use crate::event::{AgentEvent, EventKind};
use crate::prompts::MANAGER_SYSTEM_PROMPT;

const EVENT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_MAX_RETRIES: u32 = 2;

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Infer a result when the Coder emitted no `<result>` block.
fn infer_result(full_output: &str) -> TaskResult {
    let lowered = full_output.to_lowercase();
    if full_output.trim().is_empty() {
        TaskResult {
            status: TaskStatus::Failed,
            summary: "No output from coder".into(),
            files_changed: Vec::new(),
            tested: false,
            errors: vec!["No output from coder".into()],
        }
    } else if lowered.contains("error") || lowered.contains("failed") {
        TaskResult {
            status: TaskStatus::Failed,
            summary: "Task execution encountered errors".into(),
            files_changed: Vec::new(),
            tested: false,
            errors: vec![truncate(full_output, 500)],
        }
    } else {
        TaskResult {
            status: TaskStatus::Completed,
            summary: truncate(full_output, 200),
            files_changed: Vec::new(),
            tested: false,
            errors: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct ManagerAgent {
    provider: Arc<dyn ChatProvider>,
    coder: CoderAgent,
    max_retries: u32,
    manager_model: Option<String>,
}

impl ManagerAgent {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        coder: CoderAgent,
        max_retries: u32,
        manager_model: Option<String>,
    ) -> Self {
        Self {
            provider,
            coder,
            max_retries,
            manager_model,
        }
    }

    /// Convert a user request into a structured plan. Parse failures fall
    /// back to a single-task plan; provider failures propagate.
    pub async fn decompose_intent(&self, user_text: &str, context: Option<&str>) -> Result<TaskPlan> {
        let mut messages = vec![ChatMessage::system(MANAGER_SYSTEM_PROMPT)];
        if let Some(context) = context {
            messages.push(ChatMessage::system(format!(
                "Context from prior conversation:\n{context}"
            )));
        }
        messages.push(ChatMessage::user(user_text));

        let response = self
            .provider
            .chat(&messages, self.manager_model.as_deref(), None)
            .await?;

        Ok(parse_plan_xml(&response).unwrap_or_else(|| {
            tracing::warn!("manager output had no <plan> block, using fallback plan");
            TaskPlan::fallback(user_text)
        }))
    }

    /// Main entry point for one request. Returns the event stream; the
    /// lifecycle runs as a spawned task.
    pub fn process_request(
        &self,
        session: Arc<AgentSession>,
        user_text: String,
        context: Option<String>,
        cancel: CancelToken,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let agent = self.clone();
        tokio::spawn(async move {
            agent
                .process_request_inner(session, user_text, context, cancel, tx)
                .await;
        });
        rx
    }

    async fn process_request_inner(
        &self,
        session: Arc<AgentSession>,
        user_text: String,
        context: Option<String>,
        cancel: CancelToken,
        tx: mpsc::Sender<AgentEvent>,
    ) {
        let _ = tx
            .send(AgentEvent::new(
                EventKind::Manager,
                "manager",
                "manager",
                "Analyzing request...",
            ))
            .await;

        let plan = match self.decompose_intent(&user_text, context.as_deref()).await {
            Ok(plan) => plan,
            Err(e) => {
                let mut event = AgentEvent::new(
                    EventKind::Error,
                    "system",
                    "system",
                    format!("Planning failed: {e}"),
                );
                event.metadata.severity = Some("error".into());
                let _ = tx.send(event).await;
                return;
            }
        };

        if let Some(question) = &plan.needs_clarification {
            let _ = tx
                .send(AgentEvent::new(
                    EventKind::Clarify,
                    "manager",
                    "manager",
                    question.as_str(),
                ))
                .await;
            return;
        }

        let task_list: Vec<String> = plan
            .tasks
            .iter()
            .map(|t| format!("  {}. {}", t.id, t.description))
            .collect();
        let mut plan_event = AgentEvent::new(
            EventKind::Plan,
            "manager",
            "manager",
            format!(
                "Proposed plan (confidence: {:.0}%):\n{}",
                plan.confidence * 100.0,
                task_list.join("\n")
            ),
        );
        plan_event.metadata.intent = Some(plan.intent.clone());
        plan_event.metadata.confidence = Some(plan.confidence);
        plan_event.metadata.task_count = Some(plan.tasks.len());
        let _ = tx.send(plan_event).await;

        // ── Execute tasks in plan order ────────────────────────────
        let mut completed_tasks: Vec<String> = Vec::new();
        let mut task_results: HashMap<String, TaskResult> = HashMap::new();

        for task in &plan.tasks {
            if cancel.is_cancelled() {
                tracing::debug!("manager cancelled");
                return;
            }

            let missing: Vec<&String> = task
                .dependencies
                .iter()
                .filter(|d| !completed_tasks.contains(d))
                .collect();
            if !missing.is_empty() {
                let mut event = AgentEvent::new(
                    EventKind::System,
                    "manager",
                    "manager",
                    format!(
                        "Skipping task {}: waiting for dependencies {:?}",
                        task.id, missing
                    ),
                )
                .with_task(&task.id);
                event.metadata.severity = Some("warn".into());
                let _ = tx.send(event).await;
                continue;
            }

            let _ = tx
                .send(
                    AgentEvent::new(
                        EventKind::TaskStart,
                        "manager",
                        "manager",
                        format!("Starting task {}: {}", task.id, task.description),
                    )
                    .with_task(&task.id),
                )
                .await;

            let result = self
                .execute_task_with_retry(&session, task, &plan, &cancel, &tx)
                .await;
            let Some(result) = result else {
                // Receiver dropped or cancelled mid-task.
                return;
            };

            if result.status == TaskStatus::Completed {
                completed_tasks.push(task.id.clone());
                let mut event = AgentEvent::new(
                    EventKind::TaskComplete,
                    "manager",
                    "manager",
                    format!("Task {} completed: {}", task.id, result.summary),
                )
                .with_task(&task.id);
                event.metadata.files_changed = Some(result.files_changed.clone());
                event.metadata.tested = Some(result.tested);
                let _ = tx.send(event).await;
            } else {
                let reason = if result.errors.is_empty() {
                    "Unknown error".to_string()
                } else {
                    result.errors.join("; ")
                };
                let mut event = AgentEvent::new(
                    EventKind::TaskFailed,
                    "manager",
                    "manager",
                    format!("Task {} failed: {reason}", task.id),
                )
                .with_task(&task.id);
                event.metadata.errors = Some(result.errors.clone());
                let _ = tx.send(event).await;
                // High autonomy: keep going; only dependents are skipped.
            }

            task_results.insert(task.id.clone(), result);
        }

        // ── Final summary ──────────────────────────────────────────
        let completed_count = completed_tasks.len();
        let total_count = plan.tasks.len();

        let mut all_files: Vec<String> = Vec::new();
        for task in &plan.tasks {
            if let Some(result) = task_results.get(&task.id) {
                for file in &result.files_changed {
                    if !all_files.contains(file) {
                        all_files.push(file.clone());
                    }
                }
            }
        }

        let mut summary = if completed_count == total_count {
            format!("Completed all {total_count} tasks for: {}", plan.intent)
        } else {
            format!(
                "Completed {completed_count}/{total_count} tasks for: {}",
                plan.intent
            )
        };
        if !all_files.is_empty() {
            summary.push_str(&format!("\nFiles changed: {}", all_files.join(", ")));
        }

        let mut event = AgentEvent::new(EventKind::Summary, "manager", "manager", summary);
        event.metadata.completed = Some(completed_count);
        event.metadata.total = Some(total_count);
        event.metadata.files_changed = Some(all_files);
        let _ = tx.send(event).await;
    }

    /// Run one task through the Coder, retrying on failure with the
    /// previous errors folded into the next prompt. At most
    /// `max_retries + 1` Coder invocations. Returns `None` when the
    /// downstream receiver is gone.
    async fn execute_task_with_retry(
        &self,
        session: &Arc<AgentSession>,
        task: &Task,
        plan: &TaskPlan,
        cancel: &CancelToken,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Option<TaskResult> {
        let mut last_result: Option<TaskResult> = None;

        for attempt in 0..=self.max_retries {
            if cancel.is_cancelled() {
                return None;
            }

            let prompt = build_coder_prompt(task, plan, last_result.as_ref());
            let mut coder_rx =
                self.coder
                    .run(session.clone(), prompt, Some(task.id.clone()), cancel.clone());

            let mut output_parts: Vec<String> = Vec::new();
            while let Some(mut event) = coder_rx.recv().await {
                if event.kind == EventKind::Assistant {
                    output_parts.push(event.content.clone());
                }
                // Forward verbatim, annotated with task context.
                event.metadata.task_id = Some(task.id.clone());
                event.metadata.attempt = Some(attempt + 1);
                if tx.send(event).await.is_err() {
                    return None;
                }
            }

            let full_output = output_parts.join("\n");
            let result = parse_result_xml(&full_output).unwrap_or_else(|| infer_result(&full_output));

            if result.status == TaskStatus::Completed {
                return Some(result);
            }
            tracing::debug!(
                task_id = %task.id,
                attempt = attempt + 1,
                errors = ?result.errors,
                "task attempt failed"
            );
            last_result = Some(result);
        }

        Some(last_result.unwrap_or(TaskResult {
            status: TaskStatus::Failed,
            summary: "Task failed after all retries".into(),
            files_changed: Vec::new(),
            tested: false,
            errors: vec!["Max retries exceeded".into()],
        }))
    }
}

/// Build the Coder prompt for one task, folding in prior-failure context.
fn build_coder_prompt(task: &Task, plan: &TaskPlan, last_result: Option<&TaskResult>) -> String {
    let mut prompt = format!(
        "Execute this task:\n\nTask: {}\nSuccess Criteria: {}\nOverall Goal: {}\n",
        task.description, task.success_criteria, plan.intent
    );
    if let Some(last) = last_result {
        if !last.errors.is_empty() {
            prompt.push_str(&format!(
                "\nPrevious Attempt Failed:\n{}\n\nPlease try a different approach.\n",
                last.errors.join("; ")
            ));
        }
    }
    prompt
}
