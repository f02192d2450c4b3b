//! Execution sandbox for model-written code.
//!
//! Every execution gets its own interpreter process and its own scratch
//! directory. The reliability guard (see `guard.py`) is installed and
//! restored inside that child, so nothing the candidate does can leak into
//! the host process or into another execution. The host enforces the
//! deadline by killing the child, which also stops CPU-bound loops.
//!
//! The verdict travels through a file in a separate host-owned temp
//! directory, so neither candidate output nor the output bound can corrupt
//! it.
//!
//! `Err` from [`Sandbox::execute`] means the sandbox itself could not run
//! (no interpreter, no scratch dir). Anything the candidate does maps to an
//! [`ExecutionOutcome`].

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::types::ExecutionOutcome;
use crate::io::config::SandboxSection;
use crate::io::process::run_captured;

const GUARD_PRELUDE: &str = include_str!("guard.py");
const VERDICT_FILE: &str = "verdict.json";

/// One unit to execute. Borrows everything; the sandbox never owns or
/// mutates candidate code.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    /// Task preamble (imports, helpers) prepended to the code.
    pub preamble: &'a str,
    pub code: &'a str,
    /// Test code. May define `check(candidate)`, which is then called with
    /// the entry point.
    pub test_harness: &'a str,
    pub entry_point: &'a str,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxResult {
    pub outcome: ExecutionOutcome,
    /// Text the unit wrote to stdout/stderr.
    pub output: String,
    pub duration: Duration,
}

pub trait Sandbox {
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<SandboxResult>;
}

impl<S: Sandbox + ?Sized> Sandbox for &S {
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<SandboxResult> {
        (**self).execute(request)
    }
}

/// Sandbox backed by a fresh `python3 -I -B` process per execution.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    python: String,
    memory_limit_bytes: Option<u64>,
    output_limit_bytes: usize,
    scratch_parent: Option<PathBuf>,
}

impl PythonSandbox {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            memory_limit_bytes: None,
            output_limit_bytes: 64 * 1024,
            scratch_parent: None,
        }
    }

    pub fn from_config(cfg: &SandboxSection) -> Self {
        Self {
            python: cfg.python.clone(),
            memory_limit_bytes: cfg.memory_limit_bytes,
            output_limit_bytes: cfg.output_limit_bytes,
            scratch_parent: cfg.scratch_dir.clone(),
        }
    }

    pub fn with_scratch_parent(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_parent = dir;
        self
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("repairloop-exec-");
        match &self.scratch_parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create scratch parent {}", parent.display()))?;
                builder
                    .tempdir_in(parent)
                    .with_context(|| format!("create scratch dir in {}", parent.display()))
            }
            None => builder.tempdir().context("create scratch dir"),
        }
    }
}

fn verdict_dir() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("repairloop-verdict-")
        .tempdir()
        .context("create verdict dir")
}

fn remove_dir(dir: tempfile::TempDir, label: &str) {
    let path = dir.path().to_path_buf();
    if let Err(err) = dir.close() {
        warn!(%err, dir = %path.display(), "failed to remove {label} dir");
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    verdict_path: &'a Path,
    preamble: &'a str,
    code: &'a str,
    harness: &'a str,
    entry_point: &'a str,
    memory_limit: Option<u64>,
    output_limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireVerdict {
    Passed {
        #[serde(default)]
        output: String,
    },
    AssertionFailed {
        #[serde(default)]
        detail: String,
        #[serde(default)]
        output: String,
    },
    RuntimeError {
        #[serde(default)]
        detail: String,
        #[serde(default)]
        output: String,
    },
    NoEntryPoint {
        #[serde(default)]
        output: String,
    },
}

impl WireVerdict {
    fn into_parts(self) -> (ExecutionOutcome, String) {
        match self {
            WireVerdict::Passed { output } => (ExecutionOutcome::Passed, output),
            WireVerdict::AssertionFailed { detail, output } => {
                (ExecutionOutcome::AssertionFailed { detail }, output)
            }
            WireVerdict::RuntimeError { detail, output } => {
                (ExecutionOutcome::RuntimeError { detail }, output)
            }
            WireVerdict::NoEntryPoint { output } => (ExecutionOutcome::NoEntryPoint, output),
        }
    }
}

/// A verdict file that is missing, partial or malformed yields `None`.
fn parse_verdict(contents: &str) -> Option<WireVerdict> {
    serde_json::from_str(contents.trim()).ok()
}

fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

impl Sandbox for PythonSandbox {
    #[instrument(skip_all, fields(entry_point = request.entry_point, timeout_ms = request.timeout.as_millis() as u64))]
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<SandboxResult> {
        let scratch = self.scratch_dir()?;
        let verdicts = match verdict_dir() {
            Ok(dir) => dir,
            Err(err) => {
                remove_dir(scratch, "scratch");
                return Err(err);
            }
        };
        let verdict_path = verdicts.path().join(VERDICT_FILE);
        let payload = serde_json::to_vec(&Payload {
            verdict_path: &verdict_path,
            preamble: request.preamble,
            code: request.code,
            harness: request.test_harness,
            entry_point: request.entry_point,
            memory_limit: self.memory_limit_bytes,
            output_limit: self.output_limit_bytes,
        })
        .context("encode sandbox payload")?;

        let mut cmd = Command::new(&self.python);
        cmd.arg("-I")
            .arg("-B")
            .arg("-c")
            .arg(GUARD_PRELUDE)
            .current_dir(scratch.path());

        let run = run_captured(
            cmd,
            Some(payload),
            request.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run sandbox interpreter {}", self.python));
        let verdict = fs::read_to_string(&verdict_path)
            .ok()
            .and_then(|contents| parse_verdict(&contents));

        remove_dir(scratch, "scratch");
        remove_dir(verdicts, "verdict");
        let captured = run?;

        // A written verdict means the unit finished, even if the child was
        // then killed at the deadline.
        let (outcome, output) = match verdict {
            Some(verdict) => {
                if captured.timed_out {
                    debug!("verdict written before the deadline kill");
                }
                verdict.into_parts()
            }
            None if captured.timed_out => {
                debug!("candidate timed out");
                return Ok(SandboxResult {
                    outcome: ExecutionOutcome::TimedOut,
                    output: String::new(),
                    duration: captured.elapsed,
                });
            }
            None => {
                let stderr = tail(&captured.stderr_text(), 5);
                let detail = if stderr.is_empty() {
                    format!(
                        "sandbox exited with status {:?} without a verdict",
                        captured.status.code()
                    )
                } else {
                    stderr
                };
                warn!(exit_code = ?captured.status.code(), "sandbox produced no verdict");
                (ExecutionOutcome::RuntimeError { detail }, String::new())
            }
        };
        debug!(outcome = outcome.kind().as_str(), elapsed_ms = captured.elapsed.as_millis() as u64, "candidate executed");

        Ok(SandboxResult {
            outcome,
            output,
            duration: captured.elapsed,
        })
    }
}
