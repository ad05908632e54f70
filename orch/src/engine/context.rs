//! Planning context rendering
//!
//! Turns a task's goal, position and recent history into the text handed to
//! the planner. The output never exceeds the configured character budget;
//! the goal line is always present and the newest history wins when trimming.

use tracing::debug;

use crate::domain::Task;

/// Per-entry cap so one huge result cannot crowd out the rest of the history
const MAX_ENTRY_CHARS: usize = 600;

#[derive(Debug, Clone)]
pub struct PlanningContext<'a> {
    task: &'a Task,
    step: usize,
    max_steps: usize,
    max_chars: usize,
}

impl<'a> PlanningContext<'a> {
    /// `step` is 1-based
    pub fn new(task: &'a Task, step: usize, max_steps: usize, max_chars: usize) -> Self {
        Self {
            task,
            step,
            max_steps,
            max_chars,
        }
    }

    pub fn render(&self) -> String {
        debug!(task_id = %self.task.id, step = self.step, max_chars = self.max_chars, "PlanningContext::render: called");
        let budget = self.max_chars;

        let goal_line = format!("Context: Task goal: {}", self.task.goal);
        if char_len(&goal_line) >= budget {
            debug!("PlanningContext::render: goal alone exceeds budget");
            return truncate_chars(&goal_line, budget);
        }

        let mut out = goal_line;
        let mut used = char_len(&out);

        let mut fixed = vec![
            format!("Depth: {}", self.task.depth),
            format!("Step: {}/{}", self.step, self.max_steps),
        ];
        if let Some(last) = self.task.steps.last()
            && !last.context.learned_issues.is_empty()
        {
            let issues: Vec<&str> = last.context.learned_issues.iter().map(|e| e.as_str()).collect();
            fixed.push(format!("Learned issues (step {}): {}", last.index, issues.join(", ")));
        }
        for line in fixed {
            let cost = char_len(&line) + 1;
            if used + cost > budget {
                return out;
            }
            out.push('\n');
            out.push_str(&line);
            used += cost;
        }

        const HEADER: &str = "\nRecent history:";
        let header_cost = char_len(HEADER);
        let mut picked: Vec<String> = Vec::new();
        let mut history_used = header_cost;
        for entry in self.task.history.iter().rev() {
            let line = format!("\n[{}] {}", entry.role, truncate_chars(&entry.content, MAX_ENTRY_CHARS));
            let cost = char_len(&line);
            if used + history_used + cost > budget {
                break;
            }
            history_used += cost;
            picked.push(line);
        }

        if !picked.is_empty() {
            out.push_str(HEADER);
            for line in picked.iter().rev() {
                out.push_str(line);
            }
        }
        debug!(history_entries = picked.len(), chars = char_len(&out), "PlanningContext::render: done");
        out
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut to at most `max` chars, marking the cut with "..."
pub fn truncate_chars(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    if max <= 3 {
        return s.chars().take(max).collect();
    }
    let mut cut: String = s.chars().take(max - 3).collect();
    cut.push_str("...");
    cut
}
