//! Batch orchestration: one session per task.
//!
//! Tasks run in file order. Each task gets a session log and one line in the
//! output file; `meta.json` is written once the batch finishes.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use repairloop::io::artifacts::{SessionReport, TaskRecord, append_task_record, write_session_log};
use repairloop::io::backend::Backend;
use repairloop::io::config::SessionConfig;
use repairloop::io::sandbox::Sandbox;
use repairloop::session::{policy_from_config, run_session_with_policy};

use crate::results::{EvalMeta, duration_secs, eval_run_id, file_sha256, write_meta};
use crate::task::load_tasks;

#[derive(Debug)]
pub struct RunOptions<'a> {
    pub tasks_path: &'a Path,
    pub output_path: &'a Path,
    pub logs_dir: &'a Path,
    pub limit: Option<usize>,
}

/// Result of a batch run.
#[derive(Debug)]
pub struct RunSummary {
    pub eval_run_id: String,
    pub tasks_run: usize,
    pub passed: usize,
    pub meta_path: PathBuf,
}

/// Run every task (up to `limit`) and write records, logs and metadata.
///
/// The output file is truncated first. A task whose session errors still
/// gets a record, with an empty completion.
#[instrument(skip_all, fields(tasks = %opts.tasks_path.display()))]
pub fn run_tasks<B: Backend, S: Sandbox>(
    backend: &B,
    sandbox: &S,
    config: &SessionConfig,
    opts: &RunOptions<'_>,
) -> Result<RunSummary> {
    let started_at = Utc::now();
    let eval_run_id = eval_run_id(started_at);
    let tasks_hash = file_sha256(opts.tasks_path).context("hash tasks file")?;
    let mut tasks = load_tasks(opts.tasks_path)?;
    if let Some(limit) = opts.limit {
        tasks.truncate(limit);
    }
    info!(%eval_run_id, count = tasks.len(), "eval run started");

    fs::create_dir_all(opts.logs_dir)
        .with_context(|| format!("create logs dir {}", opts.logs_dir.display()))?;
    if let Some(parent) = opts.output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output dir {}", parent.display()))?;
    }
    File::create(opts.output_path)
        .with_context(|| format!("truncate {}", opts.output_path.display()))?;

    // One policy for the whole batch so a learning policy keeps its estimates.
    let mut policy = policy_from_config(config);
    let mut passed = 0;
    let mut errors = Vec::new();

    for task in &tasks {
        debug!(task_id = %task.task_id, "task started");
        let request = task.session_request();
        let completion = match run_session_with_policy(
            backend,
            sandbox,
            config,
            &request,
            policy.as_mut(),
        ) {
            Ok(outcome) => {
                if outcome.passed() {
                    passed += 1;
                }
                let report = SessionReport {
                    task_id: Some(task.task_id.clone()),
                    termination: outcome.termination,
                    final_code: outcome.final_code,
                    history: outcome.history,
                };
                write_session_log(opts.logs_dir, &task.task_id, &report)?;
                report.final_code.as_completion().to_string()
            }
            Err(err) => {
                let err = format!("{err:#}");
                warn!(task_id = %task.task_id, %err, "session failed");
                errors.push(format!("{}: {err}", task.task_id));
                String::new()
            }
        };

        append_task_record(
            opts.output_path,
            &TaskRecord {
                task_id: task.task_id.clone(),
                prompt: format!("{}\n", task.preamble()),
                test: task.test.clone(),
                entry_point: task.entry_point.clone(),
                completion,
            },
        )?;
    }

    let finished_at = Utc::now();
    let meta = EvalMeta {
        eval_run_id: eval_run_id.clone(),
        tasks_path: opts.tasks_path.display().to_string(),
        tasks_hash,
        output_path: opts.output_path.display().to_string(),
        model: config.model.clone(),
        max_rounds: config.max_rounds,
        tasks_run: tasks.len(),
        passed,
        start_time: started_at.to_rfc3339(),
        end_time: finished_at.to_rfc3339(),
        duration_secs: duration_secs(started_at, finished_at),
        errors,
    };
    let meta_path = opts.logs_dir.join("meta.json");
    write_meta(&meta_path, &meta)?;
    info!(%eval_run_id, tasks = meta.tasks_run, passed, "eval run complete");

    Ok(RunSummary {
        eval_run_id,
        tasks_run: meta.tasks_run,
        passed,
        meta_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use repairloop::core::types::ExecutionOutcome;
    use repairloop::io::artifacts::{load_task_records, read_session_log};
    use repairloop::test_support::{ScriptedBackend, ScriptedSandbox};

    use crate::results::read_meta;

    fn task_line(id: &str, entry_point: &str) -> String {
        serde_json::json!({
            "task_id": id,
            "prompt": format!("import math\n\n\ndef {entry_point}(x):\n    \"\"\"Return x.\"\"\"\n"),
            "entry_point": entry_point,
            "test": "def check(candidate):\n    assert candidate(1) == 1\n",
        })
        .to_string()
    }

    fn write_tasks(dir: &Path, entry_points: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("tasks.jsonl");
        let lines: Vec<String> = entry_points
            .iter()
            .map(|(id, entry)| task_line(id, entry))
            .collect();
        fs::write(&path, lines.join("\n")).expect("write tasks");
        path
    }

    #[test]
    fn runs_each_task_and_records_completions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tasks = write_tasks(temp.path(), &[("t/0", "f"), ("t/1", "g")]);
        let output = temp.path().join("out/results.jsonl");
        let logs = temp.path().join("logs");
        fs::create_dir_all(output.parent().expect("parent")).expect("out dir");
        fs::write(&output, "stale line\n").expect("stale");

        let backend = ScriptedBackend::new(Vec::new())
            .with_fallback(Ok(vec!["def f(x):\n    return x".to_string()]));
        let sandbox = ScriptedSandbox::new(ExecutionOutcome::Passed);
        let summary = run_tasks(
            &backend,
            &sandbox,
            &SessionConfig::default(),
            &RunOptions {
                tasks_path: &tasks,
                output_path: &output,
                logs_dir: &logs,
                limit: None,
            },
        )
        .expect("run");

        assert_eq!(summary.tasks_run, 2);
        assert_eq!(summary.passed, 1);

        let records = load_task_records(&output).expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].completion, "def f(x):\n    return x");
        assert_eq!(records[0].prompt, "import math\n\n\n\n");
        // `g` is never defined, so the session ends without a program.
        assert_eq!(records[1].completion, "");

        let log = read_session_log(&logs.join("t_0.json")).expect("log");
        assert_eq!(log.task_id.as_deref(), Some("t/0"));
        assert!(logs.join("t_1.json").exists());

        let meta = read_meta(&summary.meta_path).expect("meta");
        assert_eq!(meta.tasks_run, 2);
        assert_eq!(meta.passed, 1);
        assert_eq!(meta.tasks_hash, file_sha256(&tasks).expect("hash"));
        assert!(meta.errors.is_empty());
    }

    #[test]
    fn limit_caps_the_batch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tasks = write_tasks(temp.path(), &[("t/0", "f"), ("t/1", "f"), ("t/2", "f")]);
        let output = temp.path().join("results.jsonl");
        let logs = temp.path().join("logs");

        let backend = ScriptedBackend::new(Vec::new())
            .with_fallback(Ok(vec!["def f(x):\n    return x".to_string()]));
        let sandbox = ScriptedSandbox::new(ExecutionOutcome::Passed);
        let summary = run_tasks(
            &backend,
            &sandbox,
            &SessionConfig::default(),
            &RunOptions {
                tasks_path: &tasks,
                output_path: &output,
                logs_dir: &logs,
                limit: Some(2),
            },
        )
        .expect("run");

        assert_eq!(summary.tasks_run, 2);
        assert_eq!(load_task_records(&output).expect("records").len(), 2);
        assert!(!logs.join("t_2.json").exists());
    }

    #[test]
    fn session_errors_are_recorded_with_empty_completion() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tasks = write_tasks(temp.path(), &[("t/0", "f")]);
        let output = temp.path().join("results.jsonl");
        let logs = temp.path().join("logs");

        let backend = ScriptedBackend::new(Vec::new());
        let sandbox = ScriptedSandbox::new(ExecutionOutcome::Passed);
        let mut config = SessionConfig::default();
        config.max_rounds = 0;
        let summary = run_tasks(
            &backend,
            &sandbox,
            &config,
            &RunOptions {
                tasks_path: &tasks,
                output_path: &output,
                logs_dir: &logs,
                limit: None,
            },
        )
        .expect("run");

        assert_eq!(summary.passed, 0);
        let records = load_task_records(&output).expect("records");
        assert_eq!(records[0].completion, "");
        let meta = read_meta(&summary.meta_path).expect("meta");
        assert_eq!(meta.errors.len(), 1);
        assert!(meta.errors[0].starts_with("t/0: "));
    }
}
