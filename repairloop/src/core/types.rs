//! Shared deterministic types for the round controller.
//!
//! These types define stable contracts between core components and the
//! serialized session logs. They must not depend on external state or I/O.

use serde::{Deserialize, Serialize};

/// Whether a candidate's code is the backend's raw completion or its
/// self-corrected variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Raw,
    Corrected,
}

/// One generated program competing for selection within a round.
///
/// Candidates are owned by the round's arena and addressed by `index`
/// (generation order). They are never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub round_index: u32,
    /// Position in the round's generation order.
    pub index: usize,
    /// Code extracted from the raw completion.
    pub raw: String,
    /// Code that is (or would be) executed: the corrected text, or `raw`
    /// when correction failed or returned nothing.
    pub code: String,
    pub provenance: Provenance,
}

impl Candidate {
    pub fn raw(round_index: u32, index: usize, raw: String) -> Self {
        Self {
            round_index,
            index,
            code: raw.clone(),
            raw,
            provenance: Provenance::Raw,
        }
    }

    pub fn corrected(round_index: u32, index: usize, raw: String, corrected: String) -> Self {
        Self {
            round_index,
            index,
            raw,
            code: corrected,
            provenance: Provenance::Corrected,
        }
    }
}

/// Classified result of executing one candidate against its harness.
///
/// Exactly one outcome exists per executed candidate and it is never revised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Passed,
    AssertionFailed { detail: String },
    TimedOut,
    RuntimeError { detail: String },
    NoEntryPoint,
}

impl ExecutionOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, ExecutionOutcome::Passed)
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            ExecutionOutcome::Passed => OutcomeKind::Passed,
            ExecutionOutcome::AssertionFailed { .. } => OutcomeKind::AssertionFailed,
            ExecutionOutcome::TimedOut => OutcomeKind::TimedOut,
            ExecutionOutcome::RuntimeError { .. } => OutcomeKind::RuntimeError,
            ExecutionOutcome::NoEntryPoint => OutcomeKind::NoEntryPoint,
        }
    }

    /// Human-readable report line embedded into the next round's feedback.
    pub fn report(&self) -> String {
        match self {
            ExecutionOutcome::Passed => "Code Test Passed.".to_string(),
            ExecutionOutcome::AssertionFailed { detail } => {
                format!("failed with AssertionError. {detail}")
            }
            ExecutionOutcome::TimedOut => "timed out".to_string(),
            ExecutionOutcome::RuntimeError { detail } => detail.clone(),
            ExecutionOutcome::NoEntryPoint => {
                "error - no method name found in candidate".to_string()
            }
        }
    }
}

/// Payload-free discriminant of [`ExecutionOutcome`], used as policy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Passed,
    AssertionFailed,
    TimedOut,
    RuntimeError,
    NoEntryPoint,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Passed => "passed",
            OutcomeKind::AssertionFailed => "assertion_failed",
            OutcomeKind::TimedOut => "timed_out",
            OutcomeKind::RuntimeError => "runtime_error",
            OutcomeKind::NoEntryPoint => "no_entry_point",
        }
    }
}

/// Why a candidate was dropped before reaching the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Completion (and its correction) produced no code.
    Empty,
    /// No callable matching the entry point could be found in the code.
    NoEntryPoint,
    /// A generated harness was required but could not be produced.
    NoHarness,
}

/// Per-candidate verdict fed to the selection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Executed(ExecutionOutcome),
    Discarded(DiscardReason),
}

/// A candidate's verdict, addressed by its generation index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub index: usize,
    pub verdict: Verdict,
}

/// Round-level failure: no candidate is eligible for selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundFailure {
    /// Generation produced zero usable completions (or the backend failed).
    EmptyCandidatePool { reason: Option<String> },
    /// Every candidate was discarded before execution.
    NoValidCandidate {
        empty: usize,
        no_entry_point: usize,
        no_harness: usize,
    },
}

impl std::fmt::Display for RoundFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundFailure::EmptyCandidatePool { reason: Some(reason) } => {
                write!(f, "empty candidate pool: {reason}")
            }
            RoundFailure::EmptyCandidatePool { reason: None } => {
                write!(f, "empty candidate pool")
            }
            RoundFailure::NoValidCandidate {
                empty,
                no_entry_point,
                no_harness,
            } => write!(
                f,
                "no valid candidate (empty={empty}, no_entry_point={no_entry_point}, no_harness={no_harness})"
            ),
        }
    }
}

/// Immutable record of one completed round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_index: u32,
    /// Code of the winning candidate as executed.
    pub chosen_code: String,
    /// Raw completion code the winner was derived from.
    pub raw_code: String,
    pub provenance: Provenance,
    pub outcome: ExecutionOutcome,
    /// Feedback text handed to the next round.
    pub feedback_text: String,
    /// Number of completions the backend returned for this round.
    pub candidate_pool_size: usize,
    /// Number of candidates that reached the sandbox.
    pub executed_count: usize,
}

/// What a single round produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundResult {
    Selected(RoundRecord),
    Failed(RoundFailure),
}

/// Code a session hands back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum FinalCode {
    /// The chosen code of the last completed round.
    Program(String),
    /// No round completed, so there is no program to return.
    FailureMarker,
}

impl FinalCode {
    pub fn program(&self) -> Option<&str> {
        match self {
            FinalCode::Program(code) => Some(code),
            FinalCode::FailureMarker => None,
        }
    }

    /// Text written to completion artifacts: the program, or empty for the marker.
    pub fn as_completion(&self) -> &str {
        self.program().unwrap_or("")
    }
}
