//! Continue/terminate decision after each round.

use serde::{Deserialize, Serialize};

use crate::core::types::{RoundFailure, RoundResult};

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// The round's chosen candidate passed.
    Passed { round_index: u32 },
    /// The last permitted round completed without a pass.
    BudgetExhausted { rounds: u32 },
    /// A round produced nothing selectable.
    RoundFailed {
        round_index: u32,
        failure: RoundFailure,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Continue,
    Terminate(Termination),
}

/// Decide whether the session proceeds after `round_index`.
///
/// Terminates on a pass, on a round-level failure, or when `round_index` is
/// the last index permitted by `max_rounds`.
pub fn next_transition(round_index: u32, max_rounds: u32, result: &RoundResult) -> Transition {
    match result {
        RoundResult::Failed(failure) => Transition::Terminate(Termination::RoundFailed {
            round_index,
            failure: failure.clone(),
        }),
        RoundResult::Selected(record) if record.outcome.is_passed() => {
            Transition::Terminate(Termination::Passed { round_index })
        }
        RoundResult::Selected(_) if round_index + 1 >= max_rounds => {
            Transition::Terminate(Termination::BudgetExhausted {
                rounds: round_index + 1,
            })
        }
        RoundResult::Selected(_) => Transition::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExecutionOutcome;
    use crate::test_support::record_with_outcome;

    #[test]
    fn pass_terminates_even_with_budget_left() {
        let result = RoundResult::Selected(record_with_outcome(0, ExecutionOutcome::Passed));
        assert_eq!(
            next_transition(0, 3, &result),
            Transition::Terminate(Termination::Passed { round_index: 0 })
        );
    }

    #[test]
    fn failure_continues_until_last_round() {
        let result = RoundResult::Selected(record_with_outcome(1, ExecutionOutcome::TimedOut));
        assert_eq!(next_transition(1, 3, &result), Transition::Continue);
        assert_eq!(
            next_transition(2, 3, &result),
            Transition::Terminate(Termination::BudgetExhausted { rounds: 3 })
        );
    }

    #[test]
    fn round_failure_terminates() {
        let failure = RoundFailure::EmptyCandidatePool { reason: None };
        let result = RoundResult::Failed(failure.clone());
        assert_eq!(
            next_transition(1, 5, &result),
            Transition::Terminate(Termination::RoundFailed {
                round_index: 1,
                failure
            })
        );
    }
}
