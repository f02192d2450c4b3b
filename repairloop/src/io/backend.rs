//! Generative backend abstraction.
//!
//! The [`Backend`] trait is the only way the round controller talks to a
//! model: `generate(messages, model, sampling) -> completions`. Tests use
//! scripted backends that return predetermined completions without spawning
//! processes.

use std::process::Command;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{BackendSection, SamplingSection};
use crate::io::process::run_captured;

/// Exit status a backend command uses to signal a retryable rate limit
/// (`EX_TEMPFAIL`).
pub const RATE_LIMIT_EXIT_CODE: i32 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub num_completions: u32,
}

impl From<&SamplingSection> for SamplingConfig {
    fn from(section: &SamplingSection) -> Self {
        Self {
            temperature: section.temperature,
            top_p: section.top_p,
            max_tokens: section.max_tokens,
            num_completions: section.num_completions,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Retryable; the caller may back off and try again.
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("backend failed: {0}")]
    Terminal(String),
}

/// Source of completions.
pub trait Backend {
    /// Return up to `request.sampling.num_completions` completions in order.
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Vec<String>, BackendError>;
}

impl<B: Backend + ?Sized> Backend for &B {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Vec<String>, BackendError> {
        (**self).generate(request)
    }
}

/// Backend that runs a configured command per call.
///
/// The request is written to the command's stdin as
/// `{"model", "messages", "temperature", "top_p", "max_tokens", "n"}` and the
/// command answers on stdout with `{"completions": [...]}`. A rate limit is
/// signalled by exit status 75 or by `{"error": {"kind": "rate_limit"}}`.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    n: u32,
}

#[derive(Deserialize)]
struct WireReply {
    #[serde(default)]
    completions: Option<Vec<String>>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl CommandBackend {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &BackendSection) -> Self {
        Self::new(
            cfg.command.clone(),
            Duration::from_secs(cfg.timeout_secs),
            cfg.output_limit_bytes,
        )
    }
}

impl Backend for CommandBackend {
    #[instrument(skip_all, fields(model = request.model, n = request.sampling.num_completions))]
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Vec<String>, BackendError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| BackendError::Terminal("backend command is empty".to_string()))?;
        let body = serde_json::to_vec(&WireRequest {
            model: request.model,
            messages: request.messages,
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            max_tokens: request.sampling.max_tokens,
            n: request.sampling.num_completions,
        })
        .map_err(|err| BackendError::Terminal(format!("encode request: {err}")))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        let out = run_captured(cmd, Some(body), self.timeout, self.output_limit_bytes)
            .map_err(|err| BackendError::Terminal(format!("{err:#}")))?;

        if out.timed_out {
            return Err(BackendError::Terminal(format!(
                "backend command timed out after {:?}",
                self.timeout
            )));
        }
        if out.status.code() == Some(RATE_LIMIT_EXIT_CODE) {
            return Err(BackendError::RateLimited(out.stderr_text().trim().to_string()));
        }
        if !out.status.success() {
            return Err(BackendError::Terminal(format!(
                "backend command exited with {:?}: {}",
                out.status.code(),
                out.stderr_text().trim()
            )));
        }
        if out.stdout_dropped > 0 {
            return Err(BackendError::Terminal(format!(
                "backend reply exceeded {} bytes",
                self.output_limit_bytes
            )));
        }

        let reply: WireReply = serde_json::from_slice(&out.stdout)
            .map_err(|err| BackendError::Terminal(format!("malformed backend reply: {err}")))?;
        match (reply.error, reply.completions) {
            (Some(error), _) if error.kind == "rate_limit" => {
                Err(BackendError::RateLimited(error.message))
            }
            (Some(error), _) => Err(BackendError::Terminal(format!(
                "{}: {}",
                error.kind, error.message
            ))),
            (None, Some(completions)) => {
                debug!(count = completions.len(), "backend returned completions");
                Ok(completions)
            }
            (None, None) => Err(BackendError::Terminal(
                "backend reply has neither completions nor error".to_string(),
            )),
        }
    }
}

/// Batching and backoff around another backend.
///
/// Requests for more than `batch_size` completions are split into batches.
/// Rate limits are retried silently with delay `min(base * attempt^2,
/// max_delay)`, within a budget of `20 * (n / batch_size + 1)` attempts.
/// Terminal errors are returned immediately.
#[derive(Debug, Clone)]
pub struct RetryingBackend<B> {
    inner: B,
    base_delay: Duration,
    max_delay: Duration,
    batch_size: u32,
}

impl<B: Backend> RetryingBackend<B> {
    pub fn new(inner: B, base_delay: Duration, max_delay: Duration, batch_size: u32) -> Self {
        Self {
            inner,
            base_delay,
            max_delay,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(inner: B, cfg: &BackendSection) -> Self {
        Self::new(
            inner,
            Duration::from_millis(cfg.retry_base_ms),
            Duration::from_secs(cfg.retry_max_delay_secs),
            cfg.batch_size,
        )
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.saturating_mul(attempt))
            .min(self.max_delay)
    }
}

impl<B: Backend> Backend for RetryingBackend<B> {
    #[instrument(skip_all, fields(n = request.sampling.num_completions, batch_size = self.batch_size))]
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Vec<String>, BackendError> {
        let wanted = request.sampling.num_completions;
        let mut completions: Vec<String> = Vec::with_capacity(wanted as usize);
        if wanted == 0 {
            return Ok(completions);
        }
        let budget = 20 * (wanted / self.batch_size + 1);

        for attempt in 0..budget {
            let remaining = wanted - completions.len() as u32;
            let batch = GenerateRequest {
                sampling: SamplingConfig {
                    num_completions: remaining.min(self.batch_size),
                    ..request.sampling
                },
                ..*request
            };
            match self.inner.generate(&batch) {
                Ok(mut got) => {
                    if got.is_empty() {
                        debug!(collected = completions.len(), "backend returned no completions");
                        return Ok(completions);
                    }
                    got.truncate(batch.sampling.num_completions as usize);
                    completions.extend(got);
                    if completions.len() as u32 >= wanted {
                        return Ok(completions);
                    }
                }
                Err(BackendError::RateLimited(reason)) => {
                    let delay = self.delay_for(attempt);
                    info!(attempt, delay_ms = delay.as_millis() as u64, %reason, "rate limited, backing off");
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }

        warn!(budget, collected = completions.len(), "retry budget exhausted");
        Err(BackendError::Terminal(format!(
            "retry budget exhausted after {budget} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn sampling(n: u32) -> SamplingConfig {
        SamplingConfig {
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 64,
            num_completions: n,
        }
    }

    fn sh(script: &str) -> CommandBackend {
        CommandBackend::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            Duration::from_secs(5),
            1 << 16,
        )
    }

    fn ask<B: Backend>(backend: &B, n: u32) -> Result<Vec<String>, BackendError> {
        let messages = [Message::user("write code")];
        backend.generate(&GenerateRequest {
            model: "test-model",
            messages: &messages,
            sampling: sampling(n),
        })
    }

    #[test]
    fn command_backend_reads_completions() {
        let backend = sh(r#"cat >/dev/null; echo '{"completions": ["a", "b"]}'"#);
        assert_eq!(ask(&backend, 2).expect("generate"), vec!["a", "b"]);
    }

    #[test]
    fn command_backend_sends_request_on_stdin() {
        let backend = sh(
            r#"if grep -q '"n":3'; then echo '{"completions":["ok"]}'; else exit 1; fi"#,
        );
        assert_eq!(ask(&backend, 3).expect("generate"), vec!["ok"]);
    }

    #[test]
    fn command_backend_maps_rate_limits() {
        let by_status = sh("cat >/dev/null; echo slow down >&2; exit 75");
        assert!(matches!(ask(&by_status, 1), Err(BackendError::RateLimited(_))));

        let by_body =
            sh(r#"cat >/dev/null; echo '{"error": {"kind": "rate_limit", "message": "429"}}'"#);
        assert_eq!(
            ask(&by_body, 1),
            Err(BackendError::RateLimited("429".to_string()))
        );
    }

    #[test]
    fn command_backend_failures_are_terminal() {
        assert!(matches!(
            ask(&sh("cat >/dev/null; exit 2"), 1),
            Err(BackendError::Terminal(_))
        ));
        assert!(matches!(
            ask(&sh("cat >/dev/null; echo not-json"), 1),
            Err(BackendError::Terminal(_))
        ));
    }

    /// Replays a fixed sequence of replies and records each requested `n`.
    struct Replay {
        replies: RefCell<Vec<Result<Vec<String>, BackendError>>>,
        requested: RefCell<Vec<u32>>,
    }

    impl Replay {
        fn new(mut replies: Vec<Result<Vec<String>, BackendError>>) -> Self {
            replies.reverse();
            Self {
                replies: RefCell::new(replies),
                requested: RefCell::new(Vec::new()),
            }
        }
    }

    impl Backend for Replay {
        fn generate(&self, request: &GenerateRequest<'_>) -> Result<Vec<String>, BackendError> {
            let n = request.sampling.num_completions;
            self.requested.borrow_mut().push(n);
            self.replies
                .borrow_mut()
                .pop()
                .unwrap_or_else(|| Err(BackendError::RateLimited("exhausted".to_string())))
        }
    }

    fn texts(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    fn retrying(inner: Replay, batch: u32) -> RetryingBackend<Replay> {
        RetryingBackend::new(inner, Duration::ZERO, Duration::ZERO, batch)
    }

    #[test]
    fn splits_requests_into_batches() {
        let backend = retrying(
            Replay::new(vec![Ok(texts("a", 10)), Ok(texts("b", 10)), Ok(texts("c", 5))]),
            10,
        );
        let got = ask(&backend, 25).expect("generate");
        assert_eq!(got.len(), 25);
        assert_eq!(got[10], "b0");
        assert_eq!(*backend.inner.requested.borrow(), vec![10, 10, 5]);
    }

    #[test]
    fn retries_rate_limits_then_succeeds() {
        let backend = retrying(
            Replay::new(vec![
                Err(BackendError::RateLimited("429".to_string())),
                Err(BackendError::RateLimited("429".to_string())),
                Ok(texts("x", 2)),
            ]),
            10,
        );
        assert_eq!(ask(&backend, 2).expect("generate"), vec!["x0", "x1"]);
        assert_eq!(backend.inner.requested.borrow().len(), 3);
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let backend = retrying(
            Replay::new(vec![Err(BackendError::Terminal("bad key".to_string()))]),
            10,
        );
        assert_eq!(
            ask(&backend, 1),
            Err(BackendError::Terminal("bad key".to_string()))
        );
        assert_eq!(backend.inner.requested.borrow().len(), 1);
    }

    #[test]
    fn gives_up_after_budget() {
        let backend = retrying(Replay::new(Vec::new()), 10);
        let err = ask(&backend, 3).unwrap_err();
        assert!(matches!(err, BackendError::Terminal(ref msg) if msg.contains("budget")));
        assert_eq!(backend.inner.requested.borrow().len(), 20);
    }

    #[test]
    fn empty_reply_stops_collection() {
        let backend = retrying(Replay::new(vec![Ok(Vec::new())]), 10);
        assert!(ask(&backend, 4).expect("generate").is_empty());
    }

    #[test]
    fn backoff_is_quadratic_and_capped() {
        let backend = RetryingBackend::new(
            Replay::new(Vec::new()),
            Duration::from_millis(100),
            Duration::from_secs(1),
            10,
        );
        assert_eq!(backend.delay_for(0), Duration::ZERO);
        assert_eq!(backend.delay_for(2), Duration::from_millis(400));
        assert_eq!(backend.delay_for(5), Duration::from_secs(1));
    }
}
