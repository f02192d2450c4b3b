//! Run metadata, persisted next to the session logs.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EvalMeta {
    pub eval_run_id: String,
    pub tasks_path: String,
    /// SHA-256 hash of the tasks file for reproducibility tracking.
    pub tasks_hash: String,
    pub output_path: String,
    pub model: String,
    pub max_rounds: u32,
    pub tasks_run: usize,
    pub passed: usize,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    /// Tasks whose session could not run, as `task_id: error`.
    pub errors: Vec<String>,
}

pub fn eval_run_id(now: DateTime<Utc>) -> String {
    format!("eval-{}", now.format("%Y%m%d_%H%M%S"))
}

pub fn duration_secs(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> f64 {
    (finished_at - started_at).num_milliseconds() as f64 / 1000.0
}

pub fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

pub fn read_meta(path: &Path) -> Result<EvalMeta> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).context("parse meta")
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn eval_run_id_format() {
        let id = eval_run_id(Utc::now());
        assert!(id.starts_with("eval-"));
        assert_eq!(id.len(), "eval-20250101_000000".len());
    }

    #[test]
    fn sha256_of_known_contents() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("tasks.jsonl");
        fs::write(&path, "abc").expect("write");
        assert_eq!(
            file_sha256(&path).expect("hash"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn meta_survives_a_write() {
        let temp = tempdir().expect("tempdir");
        let started = Utc::now();
        let meta = EvalMeta {
            eval_run_id: eval_run_id(started),
            tasks_path: "tasks.jsonl".to_string(),
            tasks_hash: "hash".to_string(),
            output_path: "out.jsonl".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            max_rounds: 3,
            tasks_run: 2,
            passed: 1,
            start_time: started.to_rfc3339(),
            end_time: started.to_rfc3339(),
            duration_secs: duration_secs(started, started),
            errors: vec!["t/1: sandbox unavailable".to_string()],
        };
        let path = temp.path().join("meta.json");
        write_meta(&path, &meta).expect("write");
        assert_eq!(read_meta(&path).expect("read"), meta);
    }
}
