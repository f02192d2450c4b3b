//! HumanEval-style task files.
//!
//! One JSON object per line with `task_id`, `prompt`, `entry_point` and
//! `test`. The prompt is the function signature plus docstring, optionally
//! preceded by imports and helpers.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use repairloop::session::{HarnessSource, SessionRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub prompt: String,
    pub entry_point: String,
    pub test: String,
}

impl Task {
    /// Everything in the prompt before the entry-point definition.
    pub fn preamble(&self) -> &str {
        split_preamble(&self.prompt, &self.entry_point)
    }

    pub fn session_request(&self) -> SessionRequest {
        SessionRequest {
            requirement: self.prompt.clone(),
            preamble: self.preamble().to_string(),
            harness: HarnessSource::Fixed(self.test.clone()),
            entry_point: Some(self.entry_point.clone()),
        }
    }
}

/// Prompt text before `def <entry_point>`, or the empty string when the
/// prompt never defines it.
pub fn split_preamble<'a>(prompt: &'a str, entry_point: &str) -> &'a str {
    let needle = format!("def {entry_point}");
    let mut offset = 0;
    while let Some(found) = prompt[offset..].find(&needle) {
        let start = offset + found;
        let end = start + needle.len();
        let at_line_start = prompt[..start]
            .chars()
            .next_back()
            .is_none_or(|c| c == '\n');
        let name_ends = prompt[end..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_'));
        if at_line_start && name_ends {
            return &prompt[..start];
        }
        offset = end;
    }
    ""
}

/// Load tasks, skipping blank lines. Duplicate ids are rejected.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let file = File::open(path).with_context(|| format!("open tasks {}", path.display()))?;
    let mut tasks: Vec<Task> = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let task: Task = serde_json::from_str(&line)
            .with_context(|| format!("parse {} line {}", path.display(), number + 1))?;
        if task.entry_point.trim().is_empty() {
            bail!("task {} has an empty entry_point", task.task_id);
        }
        if tasks.iter().any(|t| t.task_id == task.task_id) {
            bail!("duplicate task id {}", task.task_id);
        }
        tasks.push(task);
    }
    Ok(tasks)
}
