//! Normalized findings derived from analysis results
//!
//! Every typed result maps onto one `Finding`; the full result is kept as
//! JSON in `details` so downstream consumers lose nothing.

use crate::analysis::{HealthLevel, HealthScoreResult, RightSizeResult, TidalResult, ZombieVmResult};
use crate::error::AnalysisError;
use crate::observability::{AnalyzerMetrics, StructuredLogger};
use crate::source::FindingSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Persisted shape of one analysis output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub task_id: u64,
    pub job_type: String,
    pub target_type: String,
    pub target_key: String,
    pub target_name: String,
    pub severity: Severity,
    pub category: String,
    pub title: String,
    pub description: String,
    pub action: String,
    pub reason: String,
    /// vCPUs freed by acting on the finding
    pub saving_cpu: i32,
    /// Memory (MB) freed by acting on the finding
    pub saving_memory: i32,
    pub saving_cost: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Conversion of a typed result into a finding
pub trait IntoFinding {
    fn to_finding(&self, task_id: u64, created_at: DateTime<Utc>) -> Result<Finding, AnalysisError>;
}

impl IntoFinding for ZombieVmResult {
    fn to_finding(
        &self,
        task_id: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Finding, AnalysisError> {
        let severity = if self.confidence >= 90.0 {
            Severity::Critical
        } else if self.confidence >= 80.0 {
            Severity::Warning
        } else {
            Severity::Info
        };

        Ok(Finding {
            task_id,
            job_type: "zombie".to_string(),
            target_type: "vm".to_string(),
            target_key: self.vm.vm_key.clone(),
            target_name: self.vm.vm_name.clone(),
            severity,
            category: "zombie_vm".to_string(),
            title: format!("Idle VM {}", self.vm.vm_name),
            description: self.evidence.join("; "),
            action: self.recommendation.clone(),
            reason: format!(
                "confidence {:.0}%, {} low-usage days",
                self.confidence, self.days_low_usage
            ),
            saving_cpu: self.vm.cpu_count,
            saving_memory: self.vm.memory_mb,
            saving_cost: String::new(),
            details: serde_json::to_value(self)?,
            created_at,
        })
    }
}

impl IntoFinding for RightSizeResult {
    fn to_finding(
        &self,
        task_id: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Finding, AnalysisError> {
        let severity = if self.adjustment_type.is_large() {
            Severity::Warning
        } else {
            Severity::Info
        };

        Ok(Finding {
            task_id,
            job_type: "rightsize".to_string(),
            target_type: "vm".to_string(),
            target_key: self.vm.vm_key.clone(),
            target_name: self.vm.vm_name.clone(),
            severity,
            category: "right_size".to_string(),
            title: format!("Resize VM {}", self.vm.vm_name),
            description: format!(
                "sizing percentile {:.2} vCPU / {:.0} MB, peak {:.2} vCPU / {:.0} MB",
                self.cpu_p95,
                self.memory_p95,
                self.cpu_peak,
                self.memory_peak
            ),
            action: format!(
                "{}: {} → {} vCPU, {} → {} MB RAM",
                self.adjustment_type,
                self.current_cpu,
                self.recommended_cpu,
                self.current_memory_mb,
                self.recommended_memory_mb
            ),
            reason: format!("{} risk, confidence {:.0}%", self.risk_level, self.confidence),
            saving_cpu: (self.current_cpu - self.recommended_cpu).max(0),
            saving_memory: (self.current_memory_mb - self.recommended_memory_mb).max(0),
            saving_cost: self.estimated_saving.clone(),
            details: serde_json::to_value(self)?,
            created_at,
        })
    }
}

impl IntoFinding for TidalResult {
    fn to_finding(
        &self,
        task_id: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Finding, AnalysisError> {
        Ok(Finding {
            task_id,
            job_type: "tidal".to_string(),
            target_type: "vm".to_string(),
            target_key: self.vm.vm_key.clone(),
            target_name: self.vm.vm_name.clone(),
            severity: Severity::Info,
            category: "tidal_pattern".to_string(),
            title: format!("{} load cycle on VM {}", self.pattern, self.vm.vm_name),
            description: format!("stability score {:.1}", self.stability_score),
            action: self.recommendation.clone(),
            reason: format!("{} pattern", self.pattern),
            saving_cpu: 0,
            saving_memory: 0,
            saving_cost: self.estimated_saving.clone(),
            details: serde_json::to_value(self)?,
            created_at,
        })
    }
}

impl IntoFinding for HealthScoreResult {
    fn to_finding(
        &self,
        task_id: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Finding, AnalysisError> {
        let severity = match self.health_level {
            HealthLevel::Bad => Severity::Critical,
            HealthLevel::Poor => Severity::Warning,
            _ => Severity::Info,
        };

        Ok(Finding {
            task_id,
            job_type: "health".to_string(),
            target_type: "connection".to_string(),
            target_key: self.connection_id.to_string(),
            target_name: self.connection_name.clone(),
            severity,
            category: "platform_health".to_string(),
            title: format!("Platform health is {}", self.health_level),
            description: self.risk_items.join("; "),
            action: self.recommendations.join("; "),
            reason: format!(
                "balance {:.0}, overcommit {:.0}, hotspot {:.0}",
                self.resource_balance, self.overcommit_risk, self.hotspot_concentration
            ),
            saving_cpu: 0,
            saving_memory: 0,
            saving_cost: format!("health score: {:.0}", self.overall_score),
            details: serde_json::to_value(self)?,
            created_at,
        })
    }
}

/// Write findings to the sink in one batch
///
/// # Returns
/// * Number of findings written
pub async fn persist_findings(
    sink: &dyn FindingSink,
    findings: &[Finding],
) -> Result<usize, AnalysisError> {
    if findings.is_empty() {
        return Ok(0);
    }

    sink.batch_create_findings(findings.to_vec())
        .await
        .map_err(AnalysisError::Sink)?;

    AnalyzerMetrics::new().add_findings_persisted(findings.len());
    StructuredLogger::new("finding-sink")
        .log_findings_persisted(findings[0].task_id, findings.len());
    Ok(findings.len())
}
