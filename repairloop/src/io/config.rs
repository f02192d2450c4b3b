//! Session configuration stored as TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Upper bound for a single sandbox execution.
pub const MAX_SANDBOX_TIMEOUT_SECS: f64 = 24.0 * 60.0 * 60.0;

/// Convert a per-execution timeout in seconds, rejecting non-finite, zero,
/// negative and out-of-range values.
pub fn sandbox_timeout(secs: f64) -> Result<Duration> {
    if !(secs.is_finite() && secs > 0.0 && secs <= MAX_SANDBOX_TIMEOUT_SECS) {
        return Err(anyhow!(
            "sandbox timeout must be within (0, {MAX_SANDBOX_TIMEOUT_SECS}] seconds, got {secs}"
        ));
    }
    Duration::try_from_secs_f64(secs).context("sandbox timeout")
}

/// Session configuration (TOML).
///
/// Every field has a default so a partial file (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Model identifier passed through to the backend.
    pub model: String,
    /// Round budget; the session never runs more rounds than this.
    pub max_rounds: u32,
    pub sampling: SamplingSection,
    pub sandbox: SandboxSection,
    pub backend: BackendSection,
    pub roles: RolesSection,
    pub repair: RepairSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingSection {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    /// Candidates requested per round.
    pub num_completions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxSection {
    /// Interpreter used to run candidates.
    pub python: String,
    /// Wall-clock budget per candidate execution.
    pub timeout_secs: f64,
    /// Address-space limit applied inside the child, if set.
    pub memory_limit_bytes: Option<u64>,
    /// Captured stdout/stderr bound per execution.
    pub output_limit_bytes: usize,
    /// Parent directory for per-execution scratch directories. System temp
    /// dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSection {
    /// Completion command (program followed by arguments).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub retry_base_ms: u64,
    pub retry_max_delay_secs: u64,
    /// Completions requested per backend call.
    pub batch_size: u32,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RolesSection {
    /// Team description placed in the coder's system message.
    pub team: String,
    pub analyst: String,
    pub developer: String,
    pub tester: String,
    /// Ask the analyst for a plan before round 0.
    pub analyst_enabled: bool,
    /// Generate a harness per candidate when none is supplied.
    pub generate_tests: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Fixed,
    EpsilonGreedy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepairSection {
    pub policy: PolicyKind,
    pub epsilon: f64,
    pub learning_rate: f64,
    pub discount: f64,
    /// Seed for the epsilon-greedy policy; entropy-seeded when unset.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            max_rounds: 3,
            sampling: SamplingSection::default(),
            sandbox: SandboxSection::default(),
            backend: BackendSection::default(),
            roles: RolesSection::default(),
            repair: RepairSection::default(),
        }
    }
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 512,
            num_completions: 1,
        }
    }
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            timeout_secs: 3.0,
            memory_limit_bytes: None,
            output_limit_bytes: 64 * 1024,
            scratch_dir: None,
        }
    }
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            command: vec!["repairloop-backend".to_string()],
            timeout_secs: 120,
            retry_base_ms: 1000,
            retry_max_delay_secs: 60,
            batch_size: 10,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for RolesSection {
    fn default() -> Self {
        Self {
            team: "There is a development team that includes a requirement analyst, a Python developer, and a quality assurance tester. The team needs to develop programs that satisfy the requirements of the users.".to_string(),
            analyst: "You are the requirement analyst of the team. Decompose the requirement into easy-to-implement subtasks and write a concise high-level plan for the developer.".to_string(),
            developer: "You are the Python developer of the team. Write efficient, readable Python code that satisfies the requirement and follows the plan or feedback you are given.".to_string(),
            tester: "You are the quality assurance tester of the team. Write tests that check whether a function satisfies the requirement.".to_string(),
            analyst_enabled: false,
            generate_tests: false,
        }
    }
}

impl Default for RepairSection {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Fixed,
            epsilon: 0.1,
            learning_rate: 0.1,
            discount: 0.9,
            seed: None,
        }
    }
}

impl SandboxSection {
    /// Per-execution timeout. Out-of-range values (rejected by `validate`)
    /// are clamped to the bound.
    pub fn timeout(&self) -> Duration {
        sandbox_timeout(self.timeout_secs)
            .unwrap_or(Duration::from_secs_f64(MAX_SANDBOX_TIMEOUT_SECS))
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if self.max_rounds == 0 {
            return Err(anyhow!("max_rounds must be > 0"));
        }
        if self.sampling.num_completions == 0 {
            return Err(anyhow!("sampling.num_completions must be > 0"));
        }
        if self.sampling.max_tokens == 0 {
            return Err(anyhow!("sampling.max_tokens must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.sampling.top_p) {
            return Err(anyhow!("sampling.top_p must be within [0, 1]"));
        }
        if self.sampling.temperature < 0.0 {
            return Err(anyhow!("sampling.temperature must be >= 0"));
        }
        sandbox_timeout(self.sandbox.timeout_secs).context("sandbox.timeout_secs")?;
        if self.sandbox.python.trim().is_empty() {
            return Err(anyhow!("sandbox.python must be non-empty"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.sandbox.memory_limit_bytes == Some(0) {
            return Err(anyhow!("sandbox.memory_limit_bytes must be > 0 when set"));
        }
        if self.backend.command.is_empty() || self.backend.command[0].trim().is_empty() {
            return Err(anyhow!("backend.command must be a non-empty array"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if self.backend.batch_size == 0 {
            return Err(anyhow!("backend.batch_size must be > 0"));
        }
        if self.backend.output_limit_bytes == 0 {
            return Err(anyhow!("backend.output_limit_bytes must be > 0"));
        }
        for (name, value) in [
            ("repair.epsilon", self.repair.epsilon),
            ("repair.learning_rate", self.repair.learning_rate),
            ("repair.discount", self.repair.discount),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{name} must be within [0, 1]"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SessionConfig::default()`.
pub fn load_config(path: &Path) -> Result<SessionConfig> {
    if !path.exists() {
        let cfg = SessionConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SessionConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SessionConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn write_then_load_preserves_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/session.toml");
        let mut cfg = SessionConfig::default();
        cfg.max_rounds = 5;
        cfg.sandbox.memory_limit_bytes = Some(512 * 1024 * 1024);
        cfg.repair.policy = PolicyKind::EpsilonGreedy;
        cfg.repair.seed = Some(42);
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.toml");
        fs::write(
            &path,
            "max_rounds = 7\n[sampling]\nnum_completions = 4\n[repair]\npolicy = \"epsilon_greedy\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_rounds, 7);
        assert_eq!(cfg.sampling.num_completions, 4);
        assert_eq!(cfg.sampling.top_p, 1.0);
        assert_eq!(cfg.repair.policy, PolicyKind::EpsilonGreedy);
        assert_eq!(cfg.backend.batch_size, 10);
    }

    #[test]
    fn rejects_zero_budget_and_bad_probabilities() {
        let mut cfg = SessionConfig::default();
        cfg.max_rounds = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SessionConfig::default();
        cfg.repair.epsilon = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("repair.epsilon"));

        let mut cfg = SessionConfig::default();
        cfg.sandbox.timeout_secs = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sandbox_timeout_is_bounded() {
        for secs in [1e300, f64::INFINITY, f64::NAN, -1.0, MAX_SANDBOX_TIMEOUT_SECS + 1.0] {
            assert!(sandbox_timeout(secs).is_err(), "{secs}");
            let mut cfg = SessionConfig::default();
            cfg.sandbox.timeout_secs = secs;
            let err = cfg.validate().unwrap_err();
            assert!(format!("{err:#}").contains("sandbox.timeout_secs"), "{secs}");
            assert_eq!(
                cfg.sandbox.timeout(),
                Duration::from_secs_f64(MAX_SANDBOX_TIMEOUT_SECS)
            );
        }
        assert_eq!(sandbox_timeout(2.5).expect("timeout"), Duration::from_millis(2500));
    }
}
