//! Child-process execution with a deadline and bounded capture.
//!
//! Both the sandbox and the command backend go through [`run_captured`]; the
//! deadline kill here is the only cancellation mechanism in the crate.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Output of a finished (or killed) child.
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes read past the limit and dropped.
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl Captured {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).into_owned();
        if self.stderr_dropped > 0 {
            text.push_str(&format!("\n[stderr truncated {} bytes]", self.stderr_dropped));
        }
        text
    }
}

/// Spawn `cmd`, feed `stdin`, and wait at most `timeout`.
///
/// stdout and stderr are drained on reader threads so a chatty child cannot
/// block on a full pipe; at most `output_limit` bytes of each are kept. On
/// expiry the child is killed and reaped, and `timed_out` is set. Only
/// spawn/wait failures are errors.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_ms = timeout.as_millis() as u64))]
pub fn run_captured(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit: usize,
) -> Result<Captured> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;

    let writer = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(thread::spawn(move || {
                // The child may exit without reading; a broken pipe is not ours to report.
                if let Err(err) = pipe.write_all(&input) {
                    debug!(%err, "child closed stdin early");
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || drain_bounded(stdout, output_limit));
    let stderr_reader = thread::spawn(move || drain_bounded(stderr, output_limit));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_ms = timeout.as_millis() as u64, "deadline reached, killing child");
            child.kill().context("kill child")?;
            (child.wait().context("reap killed child")?, true)
        }
    };
    let elapsed = started.elapsed();

    if let Some(handle) = writer
        && handle.join().is_err()
    {
        warn!("stdin writer thread panicked");
    }
    let (stdout, stdout_dropped) = join_reader(stdout_reader).context("collect stdout")?;
    let (stderr, stderr_dropped) = join_reader(stderr_reader).context("collect stderr")?;

    if stdout_dropped > 0 || stderr_dropped > 0 {
        debug!(stdout_dropped, stderr_dropped, "output exceeded limit");
    }
    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "child finished");

    Ok(Captured {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
        elapsed,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("output reader thread panicked")))
}

fn drain_bounded<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&chunk[..room]);
        dropped += n - room;
    }
    Ok((kept, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_status() {
        let out = run_captured(sh("echo hello; exit 3"), None, Duration::from_secs(5), 1024)
            .expect("run");
        assert_eq!(out.stdout_text().trim(), "hello");
        assert_eq!(out.status.code(), Some(3));
        assert!(!out.timed_out);
    }

    #[test]
    fn feeds_stdin() {
        let out = run_captured(
            sh("cat"),
            Some(b"piped input".to_vec()),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(out.stdout_text(), "piped input");
    }

    #[test]
    fn kills_at_deadline() {
        let out = run_captured(sh("sleep 5"), None, Duration::from_millis(200), 1024).expect("run");
        assert!(out.timed_out);
        assert!(out.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn bounds_captured_output() {
        let out = run_captured(
            sh("printf '%0100d' 0"),
            None,
            Duration::from_secs(5),
            10,
        )
        .expect("run");
        assert_eq!(out.stdout.len(), 10);
        assert_eq!(out.stdout_dropped, 90);
    }

    #[test]
    fn missing_program_is_an_error() {
        let err = run_captured(
            Command::new("definitely-not-a-real-binary-xyz"),
            None,
            Duration::from_secs(1),
            10,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn"));
    }
}
