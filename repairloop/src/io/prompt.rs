//! Prompt rendering for the coder, tester and analyst roles.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const PLAN_INSTRUCTION_TEMPLATE: &str = include_str!("prompts/plan_instruction.md");
const REPORT_INSTRUCTION_TEMPLATE: &str = include_str!("prompts/report_instruction.md");
const CODE_INSTRUCTION_TEMPLATE: &str = include_str!("prompts/code_instruction.md");
const REFLECTION_TEMPLATE: &str = include_str!("prompts/reflection.md");
const TESTER_TEMPLATE: &str = include_str!("prompts/tester.md");
const ANALYST_TEMPLATE: &str = include_str!("prompts/analyst.md");

/// System message used for the self-correction call.
pub const REVIEWER_SYSTEM: &str = "You are an expert Python code reviewer and corrector.";

const NO_PREVIOUS_CODE: &str = "# No previous code provided for this review.";
const NO_FEEDBACK: &str = "# No feedback from the last round.";

/// Inputs for one self-correction prompt.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionInputs<'a> {
    pub requirement: &'a str,
    pub previous_code: &'a str,
    pub feedback: &'a str,
    pub draft: &'a str,
    /// Extra directive chosen by the instruction policy.
    pub directive: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("system", SYSTEM_TEMPLATE),
            ("plan_instruction", PLAN_INSTRUCTION_TEMPLATE),
            ("report_instruction", REPORT_INSTRUCTION_TEMPLATE),
            ("code_instruction", CODE_INSTRUCTION_TEMPLATE),
            ("reflection", REFLECTION_TEMPLATE),
            ("tester", TESTER_TEMPLATE),
            ("analyst", ANALYST_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render {name} template"))
    }

    pub fn system(&self, team: &str, role: &str, requirement: &str) -> Result<String> {
        self.render(
            "system",
            context! {
                team => team.trim(),
                role => role.trim(),
                requirement => requirement.trim(),
            },
        )
    }

    pub fn plan_instruction(&self, plan: &str) -> Result<String> {
        self.render("plan_instruction", context! { plan => plan.trim() })
    }

    pub fn report_instruction(&self, report: &str) -> Result<String> {
        self.render("report_instruction", context! { report => report.trim() })
    }

    pub fn code_instruction(&self, requirement: &str) -> Result<String> {
        self.render(
            "code_instruction",
            context! { requirement => requirement.trim() },
        )
    }

    pub fn reflection(&self, input: &ReflectionInputs<'_>) -> Result<String> {
        self.render(
            "reflection",
            context! {
                requirement => input.requirement.trim(),
                previous_code => non_empty(input.previous_code).unwrap_or(NO_PREVIOUS_CODE),
                feedback => non_empty(input.feedback).unwrap_or(NO_FEEDBACK),
                draft => input.draft.trim(),
                directive => input.directive.and_then(non_empty),
            },
        )
    }

    pub fn tester(&self, requirement: &str, code: &str, entry_point: &str) -> Result<String> {
        self.render(
            "tester",
            context! {
                requirement => requirement.trim(),
                code => code.trim(),
                entry_point => entry_point,
            },
        )
    }

    pub fn analyst(&self, requirement: &str) -> Result<String> {
        self.render("analyst", context! { requirement => requirement.trim() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PromptEngine {
        PromptEngine::new().expect("templates load")
    }

    #[test]
    fn reflection_fills_placeholders_for_first_round() {
        let prompt = engine()
            .reflection(&ReflectionInputs {
                requirement: "Sum a list.",
                previous_code: "  ",
                feedback: "",
                draft: "def sum_list(xs):\n    return 0",
                directive: None,
            })
            .expect("render");
        assert!(prompt.contains(NO_PREVIOUS_CODE));
        assert!(prompt.contains(NO_FEEDBACK));
        assert!(prompt.contains("def sum_list(xs):"));
        assert!(!prompt.contains("Additional instruction"));
    }

    #[test]
    fn reflection_includes_directive() {
        let prompt = engine()
            .reflection(&ReflectionInputs {
                requirement: "r",
                previous_code: "def f(): pass",
                feedback: "The compilation output of the preceding code is: timed out",
                draft: "def f(): return 1",
                directive: Some("Prefer the simplest correct approach."),
            })
            .expect("render");
        assert!(prompt.contains("Additional instruction for this review:"));
        assert!(prompt.contains("Prefer the simplest correct approach."));
        assert!(prompt.contains("timed out"));
    }

    #[test]
    fn code_does_not_get_html_escaped() {
        let prompt = engine()
            .tester("compare a < b && c > d", "def f(a, b):\n    return a < b", "f")
            .expect("render");
        assert!(prompt.contains("return a < b"));
        assert!(prompt.contains("`f`"));
    }

    #[test]
    fn system_message_carries_team_role_and_requirement() {
        let prompt = engine()
            .system("The team.", "The developer.", "Reverse a string.")
            .expect("render");
        assert!(prompt.starts_with("The team."));
        assert!(prompt.contains("The developer."));
        assert!(prompt.ends_with("Reverse a string."));
    }
}
