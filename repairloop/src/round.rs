//! One generate/correct/test/select round.

use std::borrow::Cow;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::extract::{is_blank, resolve_entry_point};
use crate::core::feedback::feedback_for;
use crate::core::policy::{InstructionPolicy, RepairState, reward_for};
use crate::core::selection::{Offer, Selection, Selector};
use crate::core::types::{
    Candidate, DiscardReason, Evaluation, OutcomeKind, RoundFailure, RoundRecord, RoundResult,
    Verdict,
};
use crate::io::backend::Backend;
use crate::io::roles::{Coder, Correction, Tester};
use crate::io::sandbox::{ExecutionRequest, Sandbox};
use crate::session::{HarnessSource, SessionRequest};

/// Context carried into a round from the previous one.
#[derive(Debug, Clone, Copy)]
pub struct RoundInput<'a> {
    pub round_index: u32,
    /// Analyst plan or requirement on round 0, test feedback afterwards.
    pub feedback: &'a str,
    /// Winning code of the previous round, empty on round 0.
    pub previous_code: &'a str,
    pub last_outcome: Option<OutcomeKind>,
}

/// Runs rounds against one backend, sandbox and instruction policy.
pub struct RoundController<'a, B, S> {
    pub backend: &'a B,
    pub sandbox: &'a S,
    pub coder: &'a mut Coder,
    /// Present when harnesses are generated per candidate.
    pub tester: Option<&'a Tester>,
    pub policy: &'a mut dyn InstructionPolicy,
    pub request: &'a SessionRequest,
    pub timeout: Duration,
}

impl<B: Backend, S: Sandbox> RoundController<'_, B, S> {
    /// Run one round.
    ///
    /// Candidate-level problems (failed correction, missing entry point,
    /// failing tests) are folded into the result. `Err` is returned only when
    /// the sandbox itself cannot run.
    #[instrument(skip_all, fields(round = input.round_index))]
    pub fn run(&mut self, input: &RoundInput<'_>) -> Result<RoundResult> {
        let completions = match self
            .coder
            .implement(self.backend, input.feedback, input.round_index == 0)
        {
            Ok(completions) => completions,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "generation failed");
                return Ok(RoundResult::Failed(RoundFailure::EmptyCandidatePool {
                    reason: Some(format!("{err:#}")),
                }));
            }
        };
        if completions.is_empty() {
            info!("backend returned no completions");
            return Ok(RoundResult::Failed(RoundFailure::EmptyCandidatePool {
                reason: None,
            }));
        }

        let pool_size = completions.len();
        let mut arena: Vec<Candidate> = Vec::with_capacity(pool_size);
        let mut selector = Selector::new();
        for (index, raw) in completions.into_iter().enumerate() {
            let (candidate, verdict) = self.evaluate(input, index, raw)?;
            arena.push(candidate);
            if selector.offer(Evaluation { index, verdict }) == Offer::Stop {
                debug!(index, "candidate passed, skipping the rest of the pool");
                break;
            }
        }

        match selector.finish() {
            Selection::Winner {
                index,
                outcome,
                executed,
            } => {
                let winner = arena
                    .into_iter()
                    .nth(index)
                    .ok_or_else(|| anyhow!("selected candidate {index} is not in the arena"))?;
                info!(
                    index,
                    outcome = outcome.kind().as_str(),
                    executed,
                    pool_size,
                    "round selected a candidate"
                );
                Ok(RoundResult::Selected(RoundRecord {
                    round_index: input.round_index,
                    chosen_code: winner.code,
                    raw_code: winner.raw,
                    provenance: winner.provenance,
                    feedback_text: feedback_for(&outcome),
                    outcome,
                    candidate_pool_size: pool_size,
                    executed_count: executed,
                }))
            }
            Selection::NoValidCandidate(failure) => {
                info!(%failure, "round has no valid candidate");
                Ok(RoundResult::Failed(failure))
            }
        }
    }

    fn evaluate(
        &mut self,
        input: &RoundInput<'_>,
        index: usize,
        raw: String,
    ) -> Result<(Candidate, Verdict)> {
        let round_index = input.round_index;
        if is_blank(&raw) {
            return Ok((
                Candidate::raw(round_index, index, raw),
                Verdict::Discarded(DiscardReason::Empty),
            ));
        }

        let state = RepairState {
            round_index,
            last_outcome: input.last_outcome,
        };
        let instruction = self.policy.choose_instruction(&state);
        let directive = instruction.directive(input.last_outcome);
        let correction = self.coder.correct(
            self.backend,
            &Correction {
                draft: &raw,
                previous_code: input.previous_code,
                feedback: input.feedback,
                directive: directive.as_deref(),
            },
        );
        let candidate = match correction {
            Ok(code) if !is_blank(&code) => Candidate::corrected(round_index, index, raw, code),
            Ok(_) => {
                debug!(index, "correction was empty, keeping raw candidate");
                Candidate::raw(round_index, index, raw)
            }
            Err(err) => {
                warn!(index, err = %format!("{err:#}"), "correction failed, keeping raw candidate");
                Candidate::raw(round_index, index, raw)
            }
        };

        let Some(entry_point) =
            resolve_entry_point(&candidate.code, self.request.entry_point.as_deref())
        else {
            debug!(index, "no entry point in candidate");
            return Ok((candidate, Verdict::Discarded(DiscardReason::NoEntryPoint)));
        };

        let harness: Cow<'_, str> = match (&self.request.harness, self.tester) {
            (HarnessSource::Fixed(harness), _) => Cow::Borrowed(harness.as_str()),
            (HarnessSource::Generated, Some(tester)) => {
                match tester.write_tests(self.backend, &candidate.code, &entry_point) {
                    Ok(harness) => Cow::Owned(harness),
                    Err(err) => {
                        warn!(index, err = %format!("{err:#}"), "test generation failed");
                        return Ok((candidate, Verdict::Discarded(DiscardReason::NoHarness)));
                    }
                }
            }
            (HarnessSource::Generated, None) => {
                return Ok((candidate, Verdict::Discarded(DiscardReason::NoHarness)));
            }
        };

        let result = self.sandbox.execute(&ExecutionRequest {
            preamble: &self.request.preamble,
            code: &candidate.code,
            test_harness: &harness,
            entry_point: &entry_point,
            timeout: self.timeout,
        })?;
        debug!(
            index,
            outcome = result.outcome.kind().as_str(),
            duration_ms = result.duration.as_millis() as u64,
            "candidate executed"
        );

        let next_state = RepairState {
            round_index: round_index + 1,
            last_outcome: Some(result.outcome.kind()),
        };
        self.policy.record_outcome(
            &state,
            instruction,
            reward_for(&result.outcome),
            &next_state,
            result.outcome.is_passed(),
        );
        Ok((candidate, Verdict::Executed(result.outcome)))
    }
}
