//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use repairloop::io::backend::{CommandBackend, RetryingBackend};
use repairloop::io::config::load_config;
use repairloop::io::sandbox::PythonSandbox;

use crate::report::aggregate;
use crate::results::read_meta;
use crate::run::{RunOptions, run_tasks};

/// Run a task file through the real backend and sandbox.
pub fn run_task_file(
    tasks: &Path,
    output: &Path,
    config_path: &Path,
    logs: &Path,
    limit: Option<usize>,
) -> Result<()> {
    let config = load_config(config_path).context("load config")?;
    debug!(model = %config.model, max_rounds = config.max_rounds, "config loaded");

    let backend = RetryingBackend::from_config(
        CommandBackend::from_config(&config.backend),
        &config.backend,
    );
    let sandbox = PythonSandbox::from_config(&config.sandbox);
    let summary = run_tasks(
        &backend,
        &sandbox,
        &config,
        &RunOptions {
            tasks_path: tasks,
            output_path: output,
            logs_dir: logs,
            limit,
        },
    )?;
    println!(
        "run: eval_run_id={} tasks={} passed={} output={} meta={}",
        summary.eval_run_id,
        summary.tasks_run,
        summary.passed,
        output.display(),
        summary.meta_path.display()
    );
    Ok(())
}

/// Show aggregated results for a logs directory.
pub fn report_logs(logs: &Path) -> Result<()> {
    let (summary, warnings) = aggregate(logs)?;
    println!("report: logs={} sessions={}", logs.display(), summary.sessions);
    let meta_path = logs.join("meta.json");
    if meta_path.exists() {
        let meta = read_meta(&meta_path)?;
        println!(
            "report: eval_run_id={} model={} max_rounds={} tasks_hash={} duration_secs={:.2}",
            meta.eval_run_id, meta.model, meta.max_rounds, meta.tasks_hash, meta.duration_secs
        );
        for error in &meta.errors {
            println!("report: error {error}");
        }
    }
    println!(
        "report: passed={} exhausted={} failed={}",
        summary.passed, summary.exhausted, summary.failed
    );
    if let Some(rate) = summary.pass_rate() {
        println!("report: pass_rate={rate:.3}");
    }
    if let Some(avg) = summary.avg_rounds() {
        println!("report: avg_rounds={avg:.2}");
    }
    for (round_index, count) in &summary.passed_at_round {
        println!("report: passed_at_round {round_index} {count}");
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}
