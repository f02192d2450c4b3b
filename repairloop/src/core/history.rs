//! Append-only session history keyed by round index.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::RoundRecord;

/// Rejected attempt to add a record out of order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("round {got} already recorded")]
    Duplicate { got: u32 },
    #[error("round {got} skips expected round {expected}")]
    Gap { expected: u32, got: u32 },
}

/// Ordered audit trail of a session.
///
/// Records can only be appended with the next contiguous index, and no
/// method hands out mutable access to a stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHistory {
    plan: Option<String>,
    rounds: Vec<RoundRecord>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the analyst plan. Only the first plan is kept.
    pub fn set_plan(&mut self, plan: String) {
        if self.plan.is_none() {
            self.plan = Some(plan);
        }
    }

    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    pub fn next_index(&self) -> u32 {
        self.rounds.len() as u32
    }

    pub fn append(&mut self, record: RoundRecord) -> Result<(), HistoryError> {
        let expected = self.next_index();
        if record.round_index < expected {
            return Err(HistoryError::Duplicate {
                got: record.round_index,
            });
        }
        if record.round_index > expected {
            return Err(HistoryError::Gap {
                expected,
                got: record.round_index,
            });
        }
        self.rounds.push(record);
        Ok(())
    }

    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    pub fn last(&self) -> Option<&RoundRecord> {
        self.rounds.last()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

/// Check a deserialized history for index violations.
///
/// `append` makes these impossible in-process; session logs read back from
/// disk go through this check instead.
pub fn validate_history(history: &SessionHistory) -> Vec<String> {
    history
        .rounds()
        .iter()
        .enumerate()
        .filter(|(position, record)| record.round_index as usize != *position)
        .map(|(position, record)| {
            format!(
                "record at position {position} has round_index {}",
                record.round_index
            )
        })
        .collect()
}
