//! Model-backed team roles: coder, tester and analyst.
//!
//! Roles render prompts and call a [`Backend`]; they never execute code.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::core::extract::{extract_code, is_blank};
use crate::io::backend::{Backend, GenerateRequest, Message, SamplingConfig};
use crate::io::config::SessionConfig;
use crate::io::prompt::{PromptEngine, REVIEWER_SYSTEM, ReflectionInputs};

/// Inputs for one self-correction call.
#[derive(Debug, Clone, Copy)]
pub struct Correction<'a> {
    pub draft: &'a str,
    pub previous_code: &'a str,
    pub feedback: &'a str,
    pub directive: Option<&'a str>,
}

/// Writes and self-corrects candidate programs.
///
/// The conversation holds the system message and, for every completed
/// round, the instructions sent and the chosen code as the assistant turn.
/// Instructions of a round that produced no winner are dropped.
#[derive(Debug)]
pub struct Coder {
    engine: Arc<PromptEngine>,
    model: String,
    sampling: SamplingConfig,
    requirement: String,
    conversation: Vec<Message>,
    pending: Vec<Message>,
}

impl Coder {
    pub fn new(engine: Arc<PromptEngine>, config: &SessionConfig, requirement: &str) -> Result<Self> {
        let system = engine.system(&config.roles.team, &config.roles.developer, requirement)?;
        Ok(Self {
            engine,
            model: config.model.clone(),
            sampling: SamplingConfig::from(&config.sampling),
            requirement: requirement.to_string(),
            conversation: vec![Message::system(system)],
            pending: Vec::new(),
        })
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    /// Request a pool of candidates.
    ///
    /// Returns the extracted code of every completion in generation order;
    /// blank entries are kept so indices match the backend's order.
    #[instrument(skip_all, fields(is_init = is_init))]
    pub fn implement<B: Backend>(
        &mut self,
        backend: &B,
        feedback: &str,
        is_init: bool,
    ) -> Result<Vec<String>> {
        let mut pending = Vec::with_capacity(2);
        if !feedback.trim().is_empty() {
            let instruction = if is_init {
                self.engine.plan_instruction(feedback)?
            } else {
                self.engine.report_instruction(feedback)?
            };
            pending.push(Message::user(instruction));
        }
        pending.push(Message::user(
            self.engine.code_instruction(&self.requirement)?,
        ));

        let messages: Vec<Message> = self
            .conversation
            .iter()
            .chain(pending.iter())
            .cloned()
            .collect();
        self.pending = pending;

        let completions = backend.generate(&GenerateRequest {
            model: &self.model,
            messages: &messages,
            sampling: self.sampling,
        })?;
        debug!(count = completions.len(), "coder received completions");
        Ok(completions.iter().map(|text| extract_code(text)).collect())
    }

    /// Self-correct one draft with a deterministic single completion.
    ///
    /// Returns the extracted corrected code, possibly empty.
    #[instrument(skip_all)]
    pub fn correct<B: Backend>(&self, backend: &B, correction: &Correction<'_>) -> Result<String> {
        let prompt = self.engine.reflection(&ReflectionInputs {
            requirement: &self.requirement,
            previous_code: correction.previous_code,
            feedback: correction.feedback,
            draft: correction.draft,
            directive: correction.directive,
        })?;
        let messages = [Message::system(REVIEWER_SYSTEM), Message::user(prompt)];
        let completions = backend.generate(&GenerateRequest {
            model: &self.model,
            messages: &messages,
            sampling: SamplingConfig {
                temperature: 0.0,
                num_completions: 1,
                ..self.sampling
            },
        })?;
        Ok(completions
            .first()
            .map(|text| extract_code(text))
            .unwrap_or_default())
    }

    /// Commit the current round's instructions and the chosen code.
    pub fn accept(&mut self, chosen_code: &str) {
        self.conversation.append(&mut self.pending);
        self.conversation.push(Message::assistant(chosen_code));
    }
}

/// Generates test harnesses that define `check(candidate)`.
#[derive(Debug)]
pub struct Tester {
    engine: Arc<PromptEngine>,
    model: String,
    sampling: SamplingConfig,
    system: Message,
    requirement: String,
}

impl Tester {
    pub fn new(engine: Arc<PromptEngine>, config: &SessionConfig, requirement: &str) -> Result<Self> {
        let system = engine.system(&config.roles.team, &config.roles.tester, requirement)?;
        Ok(Self {
            engine,
            model: config.model.clone(),
            sampling: SamplingConfig {
                num_completions: 1,
                ..SamplingConfig::from(&config.sampling)
            },
            system: Message::system(system),
            requirement: requirement.to_string(),
        })
    }

    #[instrument(skip_all, fields(entry_point = entry_point))]
    pub fn write_tests<B: Backend>(&self, backend: &B, code: &str, entry_point: &str) -> Result<String> {
        let prompt = self.engine.tester(&self.requirement, code, entry_point)?;
        let messages = [self.system.clone(), Message::user(prompt)];
        let completions = backend.generate(&GenerateRequest {
            model: &self.model,
            messages: &messages,
            sampling: self.sampling,
        })?;
        let harness = completions
            .first()
            .map(|text| extract_code(text))
            .unwrap_or_default();
        if is_blank(&harness) {
            return Err(anyhow!("tester returned no test code"));
        }
        Ok(harness)
    }
}

/// Produces the high-level plan used as round-0 feedback.
#[derive(Debug)]
pub struct Analyst {
    engine: Arc<PromptEngine>,
    model: String,
    sampling: SamplingConfig,
    system: Message,
    requirement: String,
}

impl Analyst {
    pub fn new(engine: Arc<PromptEngine>, config: &SessionConfig, requirement: &str) -> Result<Self> {
        let system = engine.system(&config.roles.team, &config.roles.analyst, requirement)?;
        Ok(Self {
            engine,
            model: config.model.clone(),
            sampling: SamplingConfig {
                num_completions: 1,
                ..SamplingConfig::from(&config.sampling)
            },
            system: Message::system(system),
            requirement: requirement.to_string(),
        })
    }

    #[instrument(skip_all)]
    pub fn plan<B: Backend>(&self, backend: &B) -> Result<String> {
        let prompt = self.engine.analyst(&self.requirement)?;
        let messages = [self.system.clone(), Message::user(prompt)];
        let completions = backend.generate(&GenerateRequest {
            model: &self.model,
            messages: &messages,
            sampling: self.sampling,
        })?;
        completions
            .first()
            .map(|text| text.trim().to_string())
            .filter(|plan| !plan.is_empty())
            .ok_or_else(|| anyhow!("analyst returned an empty plan"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::backend::Role;
    use crate::test_support::ScriptedBackend;

    fn engine() -> Arc<PromptEngine> {
        Arc::new(PromptEngine::new().expect("templates"))
    }

    #[test]
    fn implement_keeps_generation_order_and_blanks() {
        let backend = ScriptedBackend::new(vec![Ok(vec![
            "```python\ndef a():\n    return 1\n```".to_string(),
            "   ".to_string(),
            "def b():\n    return 2".to_string(),
        ])]);
        let mut coder =
            Coder::new(engine(), &SessionConfig::default(), "Return a number.").expect("coder");
        let codes = coder.implement(&backend, "Return a number.", true).expect("implement");
        assert_eq!(codes, vec!["def a():\n    return 1", "", "def b():\n    return 2"]);

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert_eq!(requests[0].messages.len(), 3);
    }

    #[test]
    fn accept_commits_instructions_and_answer() {
        let backend = ScriptedBackend::new(vec![Ok(vec!["def a(): pass".to_string()])]);
        let mut coder = Coder::new(engine(), &SessionConfig::default(), "r").expect("coder");
        coder.implement(&backend, "", true).expect("implement");
        coder.accept("def a(): pass");
        let roles: Vec<Role> = coder.conversation().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[test]
    fn correct_is_deterministic_single_completion() {
        let backend =
            ScriptedBackend::new(vec![Ok(vec!["```python\ndef fixed(): pass\n```".to_string()])]);
        let coder = Coder::new(engine(), &SessionConfig::default(), "r").expect("coder");
        let fixed = coder
            .correct(
                &backend,
                &Correction {
                    draft: "def broken(): pass",
                    previous_code: "",
                    feedback: "",
                    directive: None,
                },
            )
            .expect("correct");
        assert_eq!(fixed, "def fixed(): pass");
        let request = &backend.requests()[0];
        assert_eq!(request.sampling.temperature, 0.0);
        assert_eq!(request.sampling.num_completions, 1);
        assert_eq!(request.messages[0].content, REVIEWER_SYSTEM);
    }

    #[test]
    fn tester_rejects_blank_harness() {
        let backend = ScriptedBackend::new(vec![Ok(vec!["```python\n\n```".to_string()])]);
        let tester = Tester::new(engine(), &SessionConfig::default(), "r").expect("tester");
        assert!(tester.write_tests(&backend, "def f(): pass", "f").is_err());
    }

    #[test]
    fn analyst_returns_trimmed_plan() {
        let backend = ScriptedBackend::new(vec![Ok(vec!["  1. add numbers\n".to_string()])]);
        let analyst = Analyst::new(engine(), &SessionConfig::default(), "r").expect("analyst");
        assert_eq!(analyst.plan(&backend).expect("plan"), "1. add numbers");
    }
}
