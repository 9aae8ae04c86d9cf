use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// One line of `runs.jsonl`: a single CLI operation and how it went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub timestamp: String,
    pub operation: String,
    pub model: String,
    pub backend: String,
    pub latency_ms: u64,
    pub outcome: String,
}

impl RunRecord {
    pub fn new(operation: &str, model: &str, backend: &str, latency_ms: u64, outcome: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation: operation.to_string(),
            model: model.to_string(),
            backend: backend.to_string(),
            latency_ms,
            outcome: outcome.to_string(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} | {} ({}) | {:.1}s | {}",
            self.operation,
            self.model,
            self.backend,
            self.latency_ms as f64 / 1000.0,
            self.outcome,
        )
    }
}

pub struct RunLogger {
    dir: PathBuf,
}

impl RunLogger {
    pub fn new(dir: &str) -> Result<Self> {
        let dir = PathBuf::from(dir);
        fs::create_dir_all(&dir).context("Failed to create logs directory")?;
        Ok(Self { dir })
    }

    pub fn write(&self, record: &RunRecord) -> Result<()> {
        let path = self.dir.join("runs.jsonl");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open log file")?;

        let json = serde_json::to_string(record).context("Failed to serialize run record")?;
        writeln!(file, "{}", json).context("Failed to write log")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let logger = RunLogger::new(dir.path().to_str().unwrap()).unwrap();

        logger
            .write(&RunRecord::new(
                "analyze",
                "gemini-3-pro-preview",
                "hosted",
                1234,
                "ok",
            ))
            .unwrap();
        logger
            .write(&RunRecord::new(
                "ideate",
                "qwen3:0.6b",
                "local",
                5678,
                "error: request interrupted",
            ))
            .unwrap();

        let content = fs::read_to_string(dir.path().join("runs.jsonl")).unwrap();
        let records: Vec<RunRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].operation, "analyze");
        assert_eq!(records[0].backend, "hosted");
        assert_eq!(records[1].outcome, "error: request interrupted");
        assert_ne!(records[0].id, records[1].id);
    }

    #[test]
    fn summary_is_a_single_line() {
        let record = RunRecord::new("evaluate", "qwen3:0.6b", "local", 2500, "ok");
        let summary = record.summary();
        assert!(summary.contains("evaluate"));
        assert!(summary.contains("2.5s"));
        assert!(!summary.contains('\n'));
    }
}
