use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use repairloop::core::transition::Termination;
use repairloop::io::artifacts::read_session_log;

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub sessions: usize,
    pub passed: usize,
    pub exhausted: usize,
    pub failed: usize,
    /// Rounds used by passing sessions, keyed by the passing round index.
    pub passed_at_round: BTreeMap<u32, usize>,
    pub total_rounds: usize,
}

impl ReportSummary {
    pub fn pass_rate(&self) -> Option<f64> {
        (self.sessions > 0).then(|| self.passed as f64 / self.sessions as f64)
    }

    pub fn avg_rounds(&self) -> Option<f64> {
        (self.sessions > 0).then(|| self.total_rounds as f64 / self.sessions as f64)
    }
}

/// Session log files in `logs_dir`, sorted. `meta.json` is not a session log.
pub fn load_log_paths(logs_dir: &Path) -> Result<Vec<PathBuf>> {
    if !logs_dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(logs_dir).with_context(|| format!("read {}", logs_dir.display()))? {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let is_meta = path.file_name().is_some_and(|name| name == "meta.json");
        if path.is_file() && is_json && !is_meta {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn aggregate(logs_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();

    for path in load_log_paths(logs_dir)? {
        let report = match read_session_log(&path) {
            Ok(report) => report,
            Err(err) => {
                warnings.push(format!("skip {}: {err:#}", path.display()));
                continue;
            }
        };

        summary.sessions += 1;
        summary.total_rounds += report.history.len();
        match report.termination {
            Termination::Passed { round_index } => {
                summary.passed += 1;
                *summary.passed_at_round.entry(round_index).or_insert(0) += 1;
            }
            Termination::BudgetExhausted { .. } => summary.exhausted += 1,
            Termination::RoundFailed { .. } => summary.failed += 1,
        }
    }

    Ok((summary, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use repairloop::core::history::SessionHistory;
    use repairloop::core::types::{FinalCode, RoundFailure};
    use repairloop::io::artifacts::{SessionReport, write_session_log};
    use repairloop::test_support::record;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, termination: Termination, rounds: u32) {
        let mut history = SessionHistory::new();
        for index in 0..rounds {
            history.append(record(index)).expect("append");
        }
        let final_code = if rounds == 0 {
            FinalCode::FailureMarker
        } else {
            FinalCode::Program("def f(): pass".to_string())
        };
        let report = SessionReport {
            task_id: Some(name.to_string()),
            termination,
            final_code,
            history,
        };
        write_session_log(dir, name, &report).expect("write log");
    }

    #[test]
    fn aggregates_sessions() {
        let temp = tempdir().expect("tempdir");
        write(temp.path(), "t/0", Termination::Passed { round_index: 0 }, 1);
        write(temp.path(), "t/1", Termination::Passed { round_index: 1 }, 2);
        write(
            temp.path(),
            "t/2",
            Termination::BudgetExhausted { rounds: 3 },
            3,
        );
        write(
            temp.path(),
            "t/3",
            Termination::RoundFailed {
                round_index: 0,
                failure: RoundFailure::EmptyCandidatePool { reason: None },
            },
            0,
        );
        fs::write(temp.path().join("meta.json"), "{}").expect("meta");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.sessions, 4);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.exhausted, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pass_rate(), Some(0.5));
        assert_eq!(summary.avg_rounds(), Some(1.5));
        assert_eq!(summary.passed_at_round.get(&0), Some(&1));
        assert_eq!(summary.passed_at_round.get(&1), Some(&1));
    }

    #[test]
    fn unreadable_logs_become_warnings() {
        let temp = tempdir().expect("tempdir");
        write(temp.path(), "t/0", Termination::Passed { round_index: 0 }, 1);
        fs::write(temp.path().join("broken.json"), "{not json").expect("broken");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.sessions, 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("broken.json"));
    }

    #[test]
    fn missing_dir_is_empty() {
        let temp = tempdir().expect("tempdir");
        let (summary, _) = aggregate(&temp.path().join("absent")).expect("aggregate");
        assert_eq!(summary.sessions, 0);
        assert_eq!(summary.pass_rate(), None);
    }
}
