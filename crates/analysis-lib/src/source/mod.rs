//! Read and write contracts with the external collaborators
//!
//! The analyzers pull inventory and metric series through these traits and
//! hand normalized findings to a sink. Connectors, persistence and scheduling
//! live outside this crate; `MemoryStore` is the in-process implementation
//! used by tests and by the snapshot runner.

mod memory;

pub use memory::{InventorySnapshot, MemoryStore, MetricSeries};

use crate::findings::Finding;
use crate::models::{
    ClusterSnapshot, ConnectionInfo, HostSnapshot, MetricSample, MetricType, VmSnapshot,
};
use anyhow::Result;
use chrono::{DateTime, Utc};

pub use async_trait::async_trait;

/// Read-only access to inventory records of a connection
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn get_connection(&self, connection_id: u64) -> Result<ConnectionInfo>;

    async fn list_clusters(&self, connection_id: u64) -> Result<Vec<ClusterSnapshot>>;

    async fn list_hosts(&self, connection_id: u64) -> Result<Vec<HostSnapshot>>;

    async fn list_vms(&self, connection_id: u64) -> Result<Vec<VmSnapshot>>;
}

/// Time-window query for a single metric series
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub vm_id: u64,
    pub metric_type: MetricType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Restrict to samples gathered by one collection run
    pub task_id: Option<u64>,
}

impl MetricQuery {
    pub fn new(
        vm_id: u64,
        metric_type: MetricType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            vm_id,
            metric_type,
            start,
            end,
            task_id: None,
        }
    }

    pub fn with_task(mut self, task_id: Option<u64>) -> Self {
        self.task_id = task_id;
        self
    }
}

/// Read-only access to utilization samples
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Samples within `[start, end]`, ordered by timestamp
    async fn list_metrics(&self, query: &MetricQuery) -> Result<Vec<MetricSample>>;
}

/// Write-only persistence of findings
#[async_trait]
pub trait FindingSink: Send + Sync {
    async fn create_finding(&self, finding: Finding) -> Result<()>;

    async fn batch_create_findings(&self, findings: Vec<Finding>) -> Result<()> {
        for finding in findings {
            self.create_finding(finding).await?;
        }
        Ok(())
    }
}
