mod cli;
mod report;
mod results;
mod run;
mod task;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use repairloop::logging;

#[derive(Parser)]
#[command(name = "eval", version, about = "Batch evaluation over HumanEval-style tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one session per task and write a JSON Lines results file.
    Run {
        #[arg(long)]
        tasks: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "repairloop.toml")]
        config: PathBuf,
        /// Directory for per-task session logs and `meta.json`.
        #[arg(long, default_value = "eval-logs")]
        logs: PathBuf,
        /// Only run the first N tasks.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Summarize the session logs of a run.
    Report {
        #[arg(long, default_value = "eval-logs")]
        logs: PathBuf,
    },
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            tasks,
            output,
            config,
            logs,
            limit,
        } => cli::run_task_file(&tasks, &output, &config, &logs, limit),
        Command::Report { logs } => cli::report_logs(&logs),
    }
}
