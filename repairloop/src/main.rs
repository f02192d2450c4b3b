//! `repairloop`: solve one requirement, check one program, or write a config.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use repairloop::core::transition::Termination;
use repairloop::core::types::{ExecutionOutcome, FinalCode};
use repairloop::exit_codes;
use repairloop::io::artifacts::{SessionReport, write_session_report};
use repairloop::io::backend::{CommandBackend, RetryingBackend};
use repairloop::io::config::{SessionConfig, load_config, sandbox_timeout, write_config};
use repairloop::io::sandbox::{ExecutionRequest, PythonSandbox, Sandbox};
use repairloop::logging;
use repairloop::session::{HarnessSource, SessionRequest, run_session};

const DEFAULT_CONFIG: &str = "repairloop.toml";

#[derive(Parser)]
#[command(
    name = "repairloop",
    version,
    about = "Generate, self-correct and test programs in bounded repair rounds"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a session for a requirement and print the final code.
    Solve {
        /// File holding the natural-language requirement.
        #[arg(long)]
        requirement: PathBuf,
        /// Test harness file. Without it, harnesses are generated per candidate
        /// (requires `roles.generate_tests`).
        #[arg(long)]
        harness: Option<PathBuf>,
        /// Function the harness exercises. Defaults to the first top-level function.
        #[arg(long)]
        entry_point: Option<String>,
        /// Code prepended to every candidate before execution.
        #[arg(long)]
        preamble: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Write the session report (history and termination) as JSON.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Execute one program against a harness in the sandbox and print the outcome.
    Check {
        #[arg(long)]
        code: PathBuf,
        #[arg(long)]
        harness: PathBuf,
        #[arg(long)]
        entry_point: String,
        #[arg(long)]
        preamble: Option<PathBuf>,
        /// Overrides `sandbox.timeout_secs`.
        #[arg(long)]
        timeout_secs: Option<f64>,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Write a config file with default values.
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Solve {
            requirement,
            harness,
            entry_point,
            preamble,
            config,
            log,
        } => cmd_solve(
            &requirement,
            harness.as_deref(),
            entry_point,
            preamble.as_deref(),
            &config,
            log.as_deref(),
        ),
        Command::Check {
            code,
            harness,
            entry_point,
            preamble,
            timeout_secs,
            config,
        } => cmd_check(
            &code,
            &harness,
            &entry_point,
            preamble.as_deref(),
            timeout_secs,
            &config,
        ),
        Command::InitConfig { path, force } => cmd_init_config(&path, force),
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn cmd_solve(
    requirement: &Path,
    harness: Option<&Path>,
    entry_point: Option<String>,
    preamble: Option<&Path>,
    config_path: &Path,
    log: Option<&Path>,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let requirement = read_text(requirement)?;
    if requirement.trim().is_empty() {
        bail!("requirement is empty");
    }
    let harness = match harness {
        Some(path) => HarnessSource::Fixed(read_text(path)?),
        None if config.roles.generate_tests => HarnessSource::Generated,
        None => bail!("no --harness given and roles.generate_tests is disabled"),
    };
    let request = SessionRequest {
        requirement,
        preamble: preamble.map(read_text).transpose()?.unwrap_or_default(),
        harness,
        entry_point,
    };

    let backend = RetryingBackend::from_config(
        CommandBackend::from_config(&config.backend),
        &config.backend,
    );
    let sandbox = PythonSandbox::from_config(&config.sandbox);
    let outcome = run_session(&backend, &sandbox, &config, &request)?;

    if let Some(path) = log {
        write_session_report(
            path,
            &SessionReport {
                task_id: None,
                termination: outcome.termination.clone(),
                final_code: outcome.final_code.clone(),
                history: outcome.history.clone(),
            },
        )?;
    }

    match &outcome.final_code {
        FinalCode::Program(code) => println!("{code}"),
        FinalCode::FailureMarker => eprintln!("no program produced: {:?}", outcome.termination),
    }
    Ok(exit_code_for(&outcome.termination, &outcome.final_code))
}

fn exit_code_for(termination: &Termination, final_code: &FinalCode) -> i32 {
    match (termination, final_code) {
        (_, FinalCode::FailureMarker) => exit_codes::NO_PROGRAM,
        (Termination::Passed { .. }, _) => exit_codes::OK,
        _ => exit_codes::EXHAUSTED,
    }
}

#[derive(Serialize)]
struct CheckReport<'a> {
    outcome: &'a ExecutionOutcome,
    output: &'a str,
    duration_ms: u64,
}

fn cmd_check(
    code: &Path,
    harness: &Path,
    entry_point: &str,
    preamble: Option<&Path>,
    timeout_secs: Option<f64>,
    config_path: &Path,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let timeout = match timeout_secs {
        Some(secs) => sandbox_timeout(secs).context("--timeout-secs")?,
        None => config.sandbox.timeout(),
    };
    let code = read_text(code)?;
    let harness = read_text(harness)?;
    let preamble = preamble.map(read_text).transpose()?.unwrap_or_default();

    let sandbox = PythonSandbox::from_config(&config.sandbox);
    let result = sandbox.execute(&ExecutionRequest {
        preamble: &preamble,
        code: &code,
        test_harness: &harness,
        entry_point,
        timeout,
    })?;
    let report = CheckReport {
        outcome: &result.outcome,
        output: &result.output,
        duration_ms: result.duration.as_millis() as u64,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize check report")?
    );
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &SessionConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}
