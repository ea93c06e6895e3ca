//! JSON-lines finding sink

use analysis_lib::{Finding, FindingSink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends one JSON document per finding to a file
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn append(&self, findings: &[Finding]) -> Result<()> {
        let mut buffer = Vec::new();
        for finding in findings {
            serde_json::to_writer(&mut buffer, finding)?;
            buffer.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl FindingSink for JsonLinesSink {
    async fn create_finding(&self, finding: Finding) -> Result<()> {
        self.append(std::slice::from_ref(&finding)).await
    }

    async fn batch_create_findings(&self, findings: Vec<Finding>) -> Result<()> {
        self.append(&findings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_lib::Severity;
    use chrono::Utc;

    fn finding(target: &str) -> Finding {
        Finding {
            task_id: 3,
            job_type: "zombie".to_string(),
            target_type: "vm".to_string(),
            target_key: target.to_string(),
            target_name: target.to_string(),
            severity: Severity::Warning,
            category: "zombie_vm".to_string(),
            title: format!("Idle VM {}", target),
            description: String::new(),
            action: String::new(),
            reason: String::new(),
            saving_cpu: 2,
            saving_memory: 4096,
            saving_cost: String::new(),
            details: serde_json::json!({ "confidence": 85.0 }),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_appends_one_line_per_finding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.jsonl");
        let sink = JsonLinesSink::new(&path);

        sink.batch_create_findings(vec![finding("vm-1"), finding("vm-2")])
            .await
            .unwrap();
        sink.create_finding(finding("vm-3")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<Finding> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2].target_key, "vm-3");
        assert_eq!(parsed[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_unwritable_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("missing").join("findings.jsonl"));
        assert!(sink.create_finding(finding("vm-1")).await.is_err());
    }
}
