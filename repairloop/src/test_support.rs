//! Test-only helpers: deterministic records and scripted backend/sandbox fakes.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;

use crate::core::feedback::feedback_for;
use crate::core::types::{ExecutionOutcome, Provenance, RoundRecord};
use crate::io::backend::{Backend, BackendError, GenerateRequest, Message, SamplingConfig};
use crate::io::sandbox::{ExecutionRequest, Sandbox, SandboxResult};

/// Create a deterministic failed round record.
pub fn record(round_index: u32) -> RoundRecord {
    record_with_outcome(
        round_index,
        ExecutionOutcome::AssertionFailed {
            detail: "expected 6".to_string(),
        },
    )
}

/// Create a deterministic round record with an explicit outcome.
pub fn record_with_outcome(round_index: u32, outcome: ExecutionOutcome) -> RoundRecord {
    RoundRecord {
        round_index,
        chosen_code: format!("def f{round_index}(xs):\n    return sum(xs)\n"),
        raw_code: format!("def f{round_index}(xs):\n    return 0\n"),
        provenance: Provenance::Corrected,
        feedback_text: feedback_for(&outcome),
        outcome,
        candidate_pool_size: 1,
        executed_count: 1,
    }
}

/// Owned copy of a request seen by [`ScriptedBackend`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub sampling: SamplingConfig,
}

impl RecordedRequest {
    /// Content of the last message, usually the instruction.
    pub fn last_content(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or("")
    }
}

/// Backend that replays scripted replies in call order.
///
/// Once the script runs out, the fallback reply (if any) is returned for
/// every further call; otherwise calls fail with a terminal error.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: RefCell<VecDeque<Result<Vec<String>, BackendError>>>,
    fallback: Option<Result<Vec<String>, BackendError>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<Vec<String>, BackendError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            fallback: None,
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, reply: Result<Vec<String>, BackendError>) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Backend for ScriptedBackend {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Vec<String>, BackendError> {
        self.requests.borrow_mut().push(RecordedRequest {
            model: request.model.to_string(),
            messages: request.messages.to_vec(),
            sampling: request.sampling,
        });
        match self.replies.borrow_mut().pop_front() {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .unwrap_or_else(|| Err(BackendError::Terminal("script exhausted".to_string()))),
        }
    }
}

/// Sandbox that classifies code by substring rules instead of running it.
///
/// The first rule whose needle occurs in the submitted code decides the
/// outcome; otherwise the default outcome applies.
#[derive(Debug)]
pub struct ScriptedSandbox {
    rules: Vec<(String, ExecutionOutcome)>,
    default: ExecutionOutcome,
    executed: RefCell<Vec<String>>,
    calls: Cell<usize>,
}

impl ScriptedSandbox {
    pub fn new(default: ExecutionOutcome) -> Self {
        Self {
            rules: Vec::new(),
            default,
            executed: RefCell::new(Vec::new()),
            calls: Cell::new(0),
        }
    }

    pub fn rule(mut self, needle: &str, outcome: ExecutionOutcome) -> Self {
        self.rules.push((needle.to_string(), outcome));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Code of every execution, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<SandboxResult> {
        self.calls.set(self.calls.get() + 1);
        self.executed.borrow_mut().push(request.code.to_string());
        let outcome = self
            .rules
            .iter()
            .find(|(needle, _)| request.code.contains(needle.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(|| self.default.clone());
        Ok(SandboxResult {
            outcome,
            output: String::new(),
            duration: Duration::from_millis(1),
        })
    }
}
