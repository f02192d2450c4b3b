//! Session artifacts: per-session JSON logs and the JSON Lines task file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::history::SessionHistory;
use crate::core::transition::Termination;
use crate::core::types::FinalCode;

/// One line of the task results file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    /// Prompt preamble: the task prompt up to the entry-point definition.
    pub prompt: String,
    pub test: String,
    pub entry_point: String,
    /// Final code, or empty when the session produced no program.
    pub completion: String,
}

/// Full account of one session, written as pretty JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub termination: Termination,
    pub final_code: FinalCode,
    pub history: SessionHistory,
}

/// File name for a session log; path separators in `name` become `_`.
pub fn session_log_path(dir: &Path, name: &str) -> PathBuf {
    let safe: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect();
    dir.join(format!("{safe}.json"))
}

/// Write `report` as `<dir>/<name>.json`.
pub fn write_session_log(dir: &Path, name: &str, report: &SessionReport) -> Result<PathBuf> {
    let path = session_log_path(dir, name);
    write_session_report(&path, report)?;
    Ok(path)
}

/// Write `report` as pretty JSON to an explicit path.
pub fn write_session_report(path: &Path, report: &SessionReport) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(report).context("serialize session report")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write session log {}", path.display()))
}

pub fn read_session_log(path: &Path) -> Result<SessionReport> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read session log {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Append one record as a JSON line and flush it.
pub fn append_task_record(path: &Path, record: &TaskRecord) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output dir {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut line = serde_json::to_string(record).context("serialize task record")?;
    line.push('\n');
    file.write_all(line.as_bytes())
        .with_context(|| format!("append to {}", path.display()))?;
    file.flush()
        .with_context(|| format!("flush {}", path.display()))
}

/// Load every record; blank lines are skipped.
pub fn load_task_records(path: &Path) -> Result<Vec<TaskRecord>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("parse {} line {}", path.display(), number + 1))?;
        records.push(record);
    }
    Ok(records)
}
