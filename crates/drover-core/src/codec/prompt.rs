//! Per-step prompt formatting.
//!
//! Serializes a snapshot of session state into the labeled-section dump
//! the oracle sees. Section order is fixed -- current task first, then
//! prior context, then the error log, then history -- so the history tail
//! stays inside the oracle's recency window.

use drover_types::{HistoryEntry, Task, VerdictError};

/// Soft cap per section body, in bytes. Truncation keeps the tail.
pub const SECTION_SOFT_CAP: usize = 2048;

/// Summary line for one completed task.
#[derive(Debug, Clone)]
pub struct CompletedSummary {
    pub id: String,
    pub title: String,
    pub summary: String,
}

/// Read-only input view for one task-runner oracle call.
///
/// Built by the state manager; consumed by [`format_task_prompt`].
#[derive(Debug, Clone)]
pub struct TaskPromptView {
    pub task: Task,
    /// 1-based position of the task in the plan.
    pub step_index: usize,
    pub total_tasks: usize,
    /// Result of the most recently completed task, if any.
    pub last_step_result: Option<String>,
    /// All completed tasks so far, in completion order.
    pub completed: Vec<CompletedSummary>,
    /// Advisory hints the previous step's verdict offered.
    pub hints: Vec<String>,
    /// Whether the session is in debug mode for this task.
    pub debug_mode: bool,
    /// The error being debugged, present iff `debug_mode`.
    pub last_error: Option<VerdictError>,
    pub history: Vec<HistoryEntry>,
}

/// Serialize a view into the single prompt string for one oracle call.
pub fn format_task_prompt(view: &TaskPromptView) -> String {
    let mut prompt = String::with_capacity(2048);

    // Current task.
    prompt.push_str(&format!(
        "## Current Task (step {} of {})\n\n",
        view.step_index, view.total_tasks
    ));
    let mut task_body = format!("ID: {}\nTitle: {}\n\n{}\n", view.task.id, view.task.title, view.task.description);
    if view.task.requires_doc_search {
        task_body.push_str("\nLook up the relevant documentation before starting.\n");
    }
    prompt.push_str(&clamp_tail(&task_body, SECTION_SOFT_CAP));
    prompt.push('\n');

    // Prior context.
    if let Some(result) = &view.last_step_result {
        prompt.push_str("## Previous Step Result\n\n");
        prompt.push_str(&clamp_tail(result, SECTION_SOFT_CAP));
        prompt.push_str("\n\n");
    }

    if !view.completed.is_empty() {
        prompt.push_str("## Completed Tasks\n\n");
        let mut body = String::new();
        for done in &view.completed {
            body.push_str(&format!("- {} ({}): {}\n", done.id, done.title, done.summary));
        }
        prompt.push_str(&clamp_tail(&body, SECTION_SOFT_CAP));
        prompt.push('\n');
    }

    if !view.hints.is_empty() {
        prompt.push_str("## Hints From Previous Step\n\n");
        let mut body = String::new();
        for hint in &view.hints {
            body.push_str(&format!("- {hint}\n"));
        }
        prompt.push_str(&clamp_tail(&body, SECTION_SOFT_CAP));
        prompt.push('\n');
    }

    // Error log, only while debugging.
    if view.debug_mode {
        if let Some(error) = &view.last_error {
            prompt.push_str("## Error Log\n\n");
            let mut body = format!("The previous attempt failed: {}\n", error.message);
            if let Some(details) = &error.details {
                body.push_str(&format!("\nDetails:\n{details}\n"));
            }
            if let Some(stderr) = &error.stderr {
                body.push_str(&format!("\nStderr:\n{stderr}\n"));
            }
            prompt.push_str(&clamp_tail(&body, SECTION_SOFT_CAP));
            prompt.push('\n');
        }
    }

    // History tail.
    if !view.history.is_empty() {
        prompt.push_str("## History\n\n");
        let mut body = String::new();
        for entry in &view.history {
            body.push_str(&format!(
                "- [{}] {} {}: {}\n",
                entry.iteration, entry.task_id, entry.status, entry.summary
            ));
        }
        prompt.push_str(&clamp_tail(&body, SECTION_SOFT_CAP));
    }

    prompt
}

/// Clamp `text` to at most roughly `cap` bytes, keeping the tail.
fn clamp_tail(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut start = text.len() - cap;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[truncated]...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_types::HistoryStatus;

    fn sample_view() -> TaskPromptView {
        TaskPromptView {
            task: Task::new("t2", "Wire it up", "Connect module A to module B.", vec!["t1".into()]),
            step_index: 2,
            total_tasks: 3,
            last_step_result: Some("X=42".to_string()),
            completed: vec![CompletedSummary {
                id: "t1".to_string(),
                title: "Compute X".to_string(),
                summary: "X=42".to_string(),
            }],
            hints: vec!["run the integration tests".to_string()],
            debug_mode: false,
            last_error: None,
            history: vec![HistoryEntry::new("t1", HistoryStatus::Completed, "X=42", 1)],
        }
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let mut view = sample_view();
        view.debug_mode = true;
        view.last_error = Some(VerdictError::message("boom"));
        let prompt = format_task_prompt(&view);

        let current = prompt.find("## Current Task").expect("current task section");
        let previous = prompt.find("## Previous Step Result").expect("previous result");
        let completed = prompt.find("## Completed Tasks").expect("completed");
        let hints = prompt.find("## Hints From Previous Step").expect("hints");
        let errors = prompt.find("## Error Log").expect("error log");
        let history = prompt.find("## History").expect("history");

        assert!(current < previous);
        assert!(previous < completed);
        assert!(completed < hints);
        assert!(hints < errors);
        assert!(errors < history);
    }

    #[test]
    fn current_task_carries_step_position() {
        let prompt = format_task_prompt(&sample_view());
        assert!(prompt.contains("(step 2 of 3)"));
        assert!(prompt.contains("ID: t2"));
        assert!(prompt.contains("Connect module A to module B."));
    }

    #[test]
    fn last_step_result_is_verbatim() {
        let prompt = format_task_prompt(&sample_view());
        assert!(prompt.contains("X=42"));
    }

    #[test]
    fn error_log_omitted_outside_debug_mode() {
        let mut view = sample_view();
        view.last_error = Some(VerdictError::message("stale"));
        view.debug_mode = false;
        let prompt = format_task_prompt(&view);
        assert!(!prompt.contains("## Error Log"));
    }

    #[test]
    fn error_log_includes_details_and_stderr() {
        let mut view = sample_view();
        view.debug_mode = true;
        view.last_error = Some(VerdictError {
            message: "compile failed".to_string(),
            details: Some("missing semicolon".to_string()),
            stderr: Some("error[E0308]".to_string()),
        });
        let prompt = format_task_prompt(&view);
        assert!(prompt.contains("compile failed"));
        assert!(prompt.contains("missing semicolon"));
        assert!(prompt.contains("error[E0308]"));
    }

    #[test]
    fn doc_search_flag_adds_instruction() {
        let mut view = sample_view();
        view.task.requires_doc_search = true;
        let prompt = format_task_prompt(&view);
        assert!(prompt.contains("Look up the relevant documentation"));
    }

    #[test]
    fn oversized_section_keeps_tail() {
        let mut view = sample_view();
        let long = format!("{}THE-TAIL", "a".repeat(10 * SECTION_SOFT_CAP));
        view.last_step_result = Some(long);
        let prompt = format_task_prompt(&view);
        assert!(prompt.contains("[truncated]..."));
        assert!(prompt.contains("THE-TAIL"));
        // The head of the oversized field must be gone.
        assert!(!prompt.contains(&"a".repeat(SECTION_SOFT_CAP + 16)));
    }

    #[test]
    fn clamp_tail_respects_char_boundaries() {
        let text = format!("{}é-tail", "é".repeat(SECTION_SOFT_CAP));
        let clamped = clamp_tail(&text, 64);
        assert!(clamped.ends_with("é-tail"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let view = TaskPromptView {
            task: Task::new("t1", "First", "Do the first thing.", vec![]),
            step_index: 1,
            total_tasks: 1,
            last_step_result: None,
            completed: vec![],
            hints: vec![],
            debug_mode: false,
            last_error: None,
            history: vec![],
        };
        let prompt = format_task_prompt(&view);
        assert!(prompt.contains("## Current Task"));
        assert!(!prompt.contains("## Previous Step Result"));
        assert!(!prompt.contains("## Completed Tasks"));
        assert!(!prompt.contains("## Hints"));
        assert!(!prompt.contains("## History"));
    }
}
