//! Candidate selection policy for one round.
//!
//! Evaluations are offered in generation order. The first `Passed` wins and
//! tells the caller to stop evaluating; otherwise the first candidate that
//! was executed at all wins. Candidates discarded before execution never win.

use crate::core::types::{DiscardReason, Evaluation, ExecutionOutcome, RoundFailure, Verdict};

/// Whether the caller should keep evaluating candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Continue,
    Stop,
}

/// Final choice for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Winner {
        index: usize,
        outcome: ExecutionOutcome,
        /// Candidates that reached the sandbox, including the winner.
        executed: usize,
    },
    NoValidCandidate(RoundFailure),
}

/// Incremental selector fed one evaluation at a time.
#[derive(Debug, Default)]
pub struct Selector {
    first_executed: Option<(usize, ExecutionOutcome)>,
    passed: Option<usize>,
    executed: usize,
    empty: usize,
    no_entry_point: usize,
    no_harness: usize,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next evaluation in generation order.
    ///
    /// Returns [`Offer::Stop`] once a candidate has passed; evaluations
    /// offered after that are ignored.
    pub fn offer(&mut self, evaluation: Evaluation) -> Offer {
        if self.passed.is_some() {
            return Offer::Stop;
        }
        match evaluation.verdict {
            Verdict::Executed(outcome) => {
                self.executed += 1;
                if outcome.is_passed() {
                    self.passed = Some(evaluation.index);
                    return Offer::Stop;
                }
                if self.first_executed.is_none() {
                    self.first_executed = Some((evaluation.index, outcome));
                }
            }
            Verdict::Discarded(DiscardReason::Empty) => self.empty += 1,
            Verdict::Discarded(DiscardReason::NoEntryPoint) => self.no_entry_point += 1,
            Verdict::Discarded(DiscardReason::NoHarness) => self.no_harness += 1,
        }
        Offer::Continue
    }

    pub fn finish(self) -> Selection {
        if let Some(index) = self.passed {
            return Selection::Winner {
                index,
                outcome: ExecutionOutcome::Passed,
                executed: self.executed,
            };
        }
        match self.first_executed {
            Some((index, outcome)) => Selection::Winner {
                index,
                outcome,
                executed: self.executed,
            },
            None => Selection::NoValidCandidate(RoundFailure::NoValidCandidate {
                empty: self.empty,
                no_entry_point: self.no_entry_point,
                no_harness: self.no_harness,
            }),
        }
    }
}

/// Select from a lazily produced sequence of evaluations.
///
/// Iteration stops at the first pass, so evaluations produced by a lazy
/// iterator after the winner are never computed.
pub fn select<I>(evaluations: I) -> Selection
where
    I: IntoIterator<Item = Evaluation>,
{
    let mut selector = Selector::new();
    for evaluation in evaluations {
        if selector.offer(evaluation) == Offer::Stop {
            break;
        }
    }
    selector.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn executed(index: usize, outcome: ExecutionOutcome) -> Evaluation {
        Evaluation {
            index,
            verdict: Verdict::Executed(outcome),
        }
    }

    fn discarded(index: usize, reason: DiscardReason) -> Evaluation {
        Evaluation {
            index,
            verdict: Verdict::Discarded(reason),
        }
    }

    fn failed(detail: &str) -> ExecutionOutcome {
        ExecutionOutcome::AssertionFailed {
            detail: detail.to_string(),
        }
    }

    #[test]
    fn first_pass_wins_and_stops_evaluation() {
        let produced = Cell::new(0usize);
        let outcomes = vec![
            failed("a"),
            ExecutionOutcome::Passed,
            ExecutionOutcome::Passed,
            failed("d"),
        ];
        let selection = select(outcomes.into_iter().enumerate().map(|(index, outcome)| {
            produced.set(produced.get() + 1);
            executed(index, outcome)
        }));

        assert_eq!(
            selection,
            Selection::Winner {
                index: 1,
                outcome: ExecutionOutcome::Passed,
                executed: 2
            }
        );
        assert_eq!(produced.get(), 2, "candidates after the winner must not run");
    }

    #[test]
    fn falls_back_to_first_executed_candidate() {
        let selection = select(vec![
            discarded(0, DiscardReason::NoEntryPoint),
            executed(1, ExecutionOutcome::TimedOut),
            executed(2, failed("later")),
        ]);
        assert_eq!(
            selection,
            Selection::Winner {
                index: 1,
                outcome: ExecutionOutcome::TimedOut,
                executed: 2
            }
        );
    }

    #[test]
    fn all_discarded_is_no_valid_candidate() {
        let selection = select(vec![
            discarded(0, DiscardReason::Empty),
            discarded(1, DiscardReason::NoEntryPoint),
            discarded(2, DiscardReason::NoEntryPoint),
            discarded(3, DiscardReason::NoHarness),
        ]);
        assert_eq!(
            selection,
            Selection::NoValidCandidate(RoundFailure::NoValidCandidate {
                empty: 1,
                no_entry_point: 2,
                no_harness: 1
            })
        );
    }

    #[test]
    fn empty_input_is_no_valid_candidate() {
        let selection = select(Vec::<Evaluation>::new());
        assert!(matches!(selection, Selection::NoValidCandidate(_)));
    }

    #[test]
    fn offers_after_pass_are_ignored() {
        let mut selector = Selector::new();
        assert_eq!(
            selector.offer(executed(0, ExecutionOutcome::Passed)),
            Offer::Stop
        );
        assert_eq!(selector.offer(executed(1, failed("x"))), Offer::Stop);
        assert_eq!(
            selector.finish(),
            Selection::Winner {
                index: 0,
                outcome: ExecutionOutcome::Passed,
                executed: 1
            }
        );
    }
}
