//! Feedback text carried from one round into the next.

use crate::core::types::ExecutionOutcome;

const FEEDBACK_PREFIX: &str = "The compilation output of the preceding code is: ";

/// Render the fixed-format feedback for a chosen candidate's outcome.
pub fn feedback_for(outcome: &ExecutionOutcome) -> String {
    format!("{FEEDBACK_PREFIX}{}", outcome.report())
}
