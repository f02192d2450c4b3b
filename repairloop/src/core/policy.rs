//! Repair-instruction policies for the self-correction step.
//!
//! Before a candidate is corrected, the round controller asks an
//! [`InstructionPolicy`] which extra directive to add to the correction
//! prompt, and reports the candidate's test outcome back as a reward.
//! [`FixedPolicy`] always answers [`RepairInstruction::Reflect`] (the plain
//! correction prompt). [`EpsilonGreedyPolicy`] learns a value per
//! (state, instruction) pair with a bounded-step Q-learning update.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{ExecutionOutcome, OutcomeKind};

/// Directive added to the correction prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairInstruction {
    /// Plain review-and-correct, no extra directive.
    Reflect,
    FocusErrorType,
    SimplifyApproach,
    CheckDefinitions,
}

impl RepairInstruction {
    pub const ALL: [RepairInstruction; 4] = [
        RepairInstruction::Reflect,
        RepairInstruction::FocusErrorType,
        RepairInstruction::SimplifyApproach,
        RepairInstruction::CheckDefinitions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RepairInstruction::Reflect => "reflect",
            RepairInstruction::FocusErrorType => "focus_error_type",
            RepairInstruction::SimplifyApproach => "simplify_approach",
            RepairInstruction::CheckDefinitions => "check_definitions",
        }
    }

    /// Extra prompt text for this instruction, if any.
    pub fn directive(self, last_outcome: Option<OutcomeKind>) -> Option<String> {
        match self {
            RepairInstruction::Reflect => None,
            RepairInstruction::FocusErrorType => Some(match last_outcome {
                Some(kind) if kind != OutcomeKind::Passed => format!(
                    "The previous version ended with `{}`. Concentrate on the cause of that failure before anything else.",
                    kind.as_str()
                ),
                _ => "Concentrate on the most likely failure mode of the draft before anything else."
                    .to_string(),
            }),
            RepairInstruction::SimplifyApproach => Some(
                "Prefer the simplest correct approach. Remove needless branches, helpers and clever tricks."
                    .to_string(),
            ),
            RepairInstruction::CheckDefinitions => Some(
                "Check that every name the code uses is defined or imported, and that the entry-point function signature matches the requirement."
                    .to_string(),
            ),
        }
    }
}

/// Observation the policy conditions on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepairState {
    pub round_index: u32,
    /// Outcome of the previous round's chosen candidate (or of the candidate
    /// just executed, when used as the next state).
    pub last_outcome: Option<OutcomeKind>,
}

impl RepairState {
    /// Stable key used by value tables.
    pub fn key(&self) -> String {
        let last = self.last_outcome.map(OutcomeKind::as_str).unwrap_or("none");
        format!("round={};last={}", self.round_index, last)
    }
}

/// Pluggable choice of repair instruction.
pub trait InstructionPolicy {
    fn choose_instruction(&mut self, state: &RepairState) -> RepairInstruction;

    fn record_outcome(
        &mut self,
        state: &RepairState,
        instruction: RepairInstruction,
        reward: f64,
        next_state: &RepairState,
        terminal: bool,
    );
}

/// Reward for a candidate's test outcome.
pub fn reward_for(outcome: &ExecutionOutcome) -> f64 {
    match outcome {
        ExecutionOutcome::Passed => 1.0,
        ExecutionOutcome::AssertionFailed { .. } => 0.0,
        ExecutionOutcome::TimedOut
        | ExecutionOutcome::RuntimeError { .. }
        | ExecutionOutcome::NoEntryPoint => -1.0,
    }
}

/// Always applies the same instruction and ignores feedback.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy {
    instruction: RepairInstruction,
}

impl FixedPolicy {
    pub fn new(instruction: RepairInstruction) -> Self {
        Self { instruction }
    }
}

impl Default for FixedPolicy {
    fn default() -> Self {
        Self::new(RepairInstruction::Reflect)
    }
}

impl InstructionPolicy for FixedPolicy {
    fn choose_instruction(&mut self, _state: &RepairState) -> RepairInstruction {
        self.instruction
    }

    fn record_outcome(
        &mut self,
        _state: &RepairState,
        _instruction: RepairInstruction,
        _reward: f64,
        _next_state: &RepairState,
        _terminal: bool,
    ) {
    }
}

/// Learning-rate, discount and exploration settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonGreedyParams {
    pub epsilon: f64,
    pub learning_rate: f64,
    pub discount: f64,
}

/// Epsilon-greedy Q-learning over [`RepairInstruction::ALL`].
pub struct EpsilonGreedyPolicy<R: Rng> {
    rng: R,
    params: EpsilonGreedyParams,
    values: HashMap<String, BTreeMap<RepairInstruction, f64>>,
}

impl<R: Rng> EpsilonGreedyPolicy<R> {
    pub fn new(rng: R, params: EpsilonGreedyParams) -> Self {
        Self {
            rng,
            params,
            values: HashMap::new(),
        }
    }

    pub fn value(&self, state: &RepairState, instruction: RepairInstruction) -> f64 {
        self.values
            .get(&state.key())
            .and_then(|row| row.get(&instruction))
            .copied()
            .unwrap_or(0.0)
    }

    fn random_instruction(&mut self) -> RepairInstruction {
        let idx = self.rng.gen_range(0..RepairInstruction::ALL.len());
        RepairInstruction::ALL[idx]
    }

    fn best_instruction(&self, state: &RepairState) -> Option<RepairInstruction> {
        let row = self.values.get(&state.key())?;
        if row.values().all(|value| *value == 0.0) {
            return None;
        }
        row.iter()
            .fold(None, |best: Option<(RepairInstruction, f64)>, (instr, value)| match best {
                Some((_, best_value)) if best_value >= *value => best,
                _ => Some((*instr, *value)),
            })
            .map(|(instr, _)| instr)
    }
}

impl<R: Rng> InstructionPolicy for EpsilonGreedyPolicy<R> {
    fn choose_instruction(&mut self, state: &RepairState) -> RepairInstruction {
        if self.rng.gen_bool(self.params.epsilon) {
            let instruction = self.random_instruction();
            debug!(state = %state.key(), instruction = instruction.as_str(), "explore");
            return instruction;
        }
        match self.best_instruction(state) {
            Some(instruction) => {
                debug!(state = %state.key(), instruction = instruction.as_str(), "exploit");
                instruction
            }
            None => {
                let instruction = self.random_instruction();
                debug!(state = %state.key(), instruction = instruction.as_str(), "no estimate, random");
                instruction
            }
        }
    }

    fn record_outcome(
        &mut self,
        state: &RepairState,
        instruction: RepairInstruction,
        reward: f64,
        next_state: &RepairState,
        terminal: bool,
    ) {
        let next_max = if terminal {
            0.0
        } else {
            self.values
                .get(&next_state.key())
                .and_then(|row| row.values().copied().reduce(f64::max))
                .unwrap_or(0.0)
        };
        let old = self.value(state, instruction);
        let updated = old
            + self.params.learning_rate * (reward + self.params.discount * next_max - old);
        self.values
            .entry(state.key())
            .or_default()
            .insert(instruction, updated);
        debug!(
            state = %state.key(),
            instruction = instruction.as_str(),
            old,
            updated,
            reward,
            next_max,
            "updated instruction value"
        );
    }
}
