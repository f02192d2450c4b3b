//! Session driver: rounds until a pass, budget exhaustion or a round failure.

use std::sync::Arc;

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::history::SessionHistory;
use crate::core::policy::{
    EpsilonGreedyParams, EpsilonGreedyPolicy, FixedPolicy, InstructionPolicy,
};
use crate::core::transition::{Termination, Transition, next_transition};
use crate::core::types::{FinalCode, OutcomeKind, RoundResult};
use crate::io::backend::Backend;
use crate::io::config::{PolicyKind, SessionConfig};
use crate::io::prompt::PromptEngine;
use crate::io::roles::{Analyst, Coder, Tester};
use crate::io::sandbox::Sandbox;
use crate::round::{RoundController, RoundInput};

/// Where a candidate's test harness comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum HarnessSource {
    /// The same harness for every candidate.
    Fixed(String),
    /// Generated per candidate by the tester role.
    Generated,
}

/// What to solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub requirement: String,
    /// Code prepended to every candidate before execution (imports, helpers).
    pub preamble: String,
    pub harness: HarnessSource,
    /// Required entry-point name; the first top-level function otherwise.
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub final_code: FinalCode,
    pub history: SessionHistory,
    pub termination: Termination,
}

impl SessionOutcome {
    pub fn passed(&self) -> bool {
        matches!(self.termination, Termination::Passed { .. })
    }
}

/// Build the instruction policy named in the config.
pub fn policy_from_config(config: &SessionConfig) -> Box<dyn InstructionPolicy> {
    match config.repair.policy {
        PolicyKind::Fixed => Box::new(FixedPolicy::default()),
        PolicyKind::EpsilonGreedy => {
            let rng = match config.repair.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            Box::new(EpsilonGreedyPolicy::new(
                rng,
                EpsilonGreedyParams {
                    epsilon: config.repair.epsilon,
                    learning_rate: config.repair.learning_rate,
                    discount: config.repair.discount,
                },
            ))
        }
    }
}

/// Run a session with the policy named in `config`.
pub fn run_session<B: Backend, S: Sandbox>(
    backend: &B,
    sandbox: &S,
    config: &SessionConfig,
    request: &SessionRequest,
) -> Result<SessionOutcome> {
    let mut policy = policy_from_config(config);
    run_session_with_policy(backend, sandbox, config, request, policy.as_mut())
}

/// Run a session with an explicit instruction policy.
///
/// The policy outlives the session, so a learning policy can carry its
/// estimates across tasks.
#[instrument(skip_all, fields(max_rounds = config.max_rounds))]
pub fn run_session_with_policy<B: Backend, S: Sandbox>(
    backend: &B,
    sandbox: &S,
    config: &SessionConfig,
    request: &SessionRequest,
    policy: &mut dyn InstructionPolicy,
) -> Result<SessionOutcome> {
    config.validate().context("session config")?;
    let engine = Arc::new(PromptEngine::new()?);
    let mut history = SessionHistory::new();

    let mut feedback = request.requirement.clone();
    if config.roles.analyst_enabled {
        let analyst = Analyst::new(Arc::clone(&engine), config, &request.requirement)?;
        match analyst.plan(backend) {
            Ok(plan) => {
                history.set_plan(plan.clone());
                feedback = plan;
            }
            Err(err) => warn!(err = %format!("{err:#}"), "analyst failed, using the requirement"),
        }
    }

    let mut coder = Coder::new(Arc::clone(&engine), config, &request.requirement)?;
    let tester = match request.harness {
        HarnessSource::Generated => Some(Tester::new(
            Arc::clone(&engine),
            config,
            &request.requirement,
        )?),
        HarnessSource::Fixed(_) => None,
    };

    let mut previous_code = String::new();
    let mut last_outcome: Option<OutcomeKind> = None;
    let mut round_index = 0u32;
    let termination = loop {
        if round_index >= config.max_rounds {
            break Termination::BudgetExhausted {
                rounds: round_index,
            };
        }
        let result = RoundController {
            backend,
            sandbox,
            coder: &mut coder,
            tester: tester.as_ref(),
            policy: &mut *policy,
            request,
            timeout: config.sandbox.timeout(),
        }
        .run(&RoundInput {
            round_index,
            feedback: &feedback,
            previous_code: &previous_code,
            last_outcome,
        })?;

        if let RoundResult::Selected(record) = &result {
            history
                .append(record.clone())
                .context("record round in history")?;
            coder.accept(&record.chosen_code);
            previous_code.clone_from(&record.chosen_code);
            feedback.clone_from(&record.feedback_text);
            last_outcome = Some(record.outcome.kind());
        }

        if let Transition::Terminate(termination) =
            next_transition(round_index, config.max_rounds, &result)
        {
            break termination;
        }
        round_index += 1;
    };

    let final_code = match history.last() {
        Some(record) => FinalCode::Program(record.chosen_code.clone()),
        None => FinalCode::FailureMarker,
    };
    info!(
        termination = ?termination,
        rounds = history.len(),
        has_program = final_code.program().is_some(),
        "session finished"
    );
    Ok(SessionOutcome {
        final_code,
        history,
        termination,
    })
}
