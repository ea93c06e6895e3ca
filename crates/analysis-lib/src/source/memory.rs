//! In-memory inventory, metric and finding store

use super::{FindingSink, InventorySource, MetricQuery, MetricSource};
use crate::findings::Finding;
use crate::models::{
    ClusterSnapshot, ConnectionInfo, HostSnapshot, MetricSample, MetricType, VmSnapshot,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// One stored metric series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSeries {
    pub vm_id: u64,
    pub metric_type: MetricType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u64>,
    pub samples: Vec<MetricSample>,
}

/// Serialized form of a single connection's inventory and metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub connection: Option<ConnectionInfo>,
    #[serde(default)]
    pub clusters: Vec<ClusterSnapshot>,
    #[serde(default)]
    pub hosts: Vec<HostSnapshot>,
    #[serde(default)]
    pub vms: Vec<VmSnapshot>,
    #[serde(default)]
    pub metrics: Vec<MetricSeries>,
}

#[derive(Debug, Default)]
struct Inventory {
    connection: Option<ConnectionInfo>,
    clusters: Vec<ClusterSnapshot>,
    hosts: Vec<HostSnapshot>,
    vms: Vec<VmSnapshot>,
}

#[derive(Debug, Clone, Copy)]
struct StoredSample {
    task_id: Option<u64>,
    sample: MetricSample,
}

/// Store backing all three collaborator traits
#[derive(Debug, Default)]
pub struct MemoryStore {
    inventories: RwLock<HashMap<u64, Inventory>>,
    metrics: RwLock<HashMap<(u64, MetricType), Vec<StoredSample>>>,
    findings: RwLock<Vec<Finding>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding one connection's snapshot
    pub fn from_snapshot(snapshot: InventorySnapshot) -> Result<Self> {
        let connection = snapshot
            .connection
            .ok_or_else(|| anyhow!("snapshot has no connection record"))?;
        let connection_id = connection.id;

        let store = Self::new();
        store.insert_connection(connection);
        for cluster in snapshot.clusters {
            store.insert_cluster(connection_id, cluster);
        }
        for host in snapshot.hosts {
            store.insert_host(connection_id, host);
        }
        for vm in snapshot.vms {
            store.insert_vm(connection_id, vm);
        }
        for series in snapshot.metrics {
            store.insert_metrics(series.vm_id, series.metric_type, series.task_id, series.samples);
        }
        Ok(store)
    }

    /// Load a JSON `InventorySnapshot` document from disk
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: InventorySnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
        Self::from_snapshot(snapshot)
    }

    pub fn insert_connection(&self, connection: ConnectionInfo) {
        let id = connection.id;
        let mut inventories = self.inventories.write().unwrap();
        inventories.entry(id).or_default().connection = Some(connection);
    }

    pub fn insert_cluster(&self, connection_id: u64, cluster: ClusterSnapshot) {
        let mut inventories = self.inventories.write().unwrap();
        inventories.entry(connection_id).or_default().clusters.push(cluster);
    }

    pub fn insert_host(&self, connection_id: u64, host: HostSnapshot) {
        let mut inventories = self.inventories.write().unwrap();
        inventories.entry(connection_id).or_default().hosts.push(host);
    }

    pub fn insert_vm(&self, connection_id: u64, vm: VmSnapshot) {
        let mut inventories = self.inventories.write().unwrap();
        inventories.entry(connection_id).or_default().vms.push(vm);
    }

    /// Append samples to a series, keeping it ordered by timestamp
    pub fn insert_metrics(
        &self,
        vm_id: u64,
        metric_type: MetricType,
        task_id: Option<u64>,
        samples: impl IntoIterator<Item = MetricSample>,
    ) {
        let mut metrics = self.metrics.write().unwrap();
        let series = metrics.entry((vm_id, metric_type)).or_default();
        series.extend(
            samples
                .into_iter()
                .map(|sample| StoredSample { task_id, sample }),
        );
        series.sort_by_key(|s| s.sample.timestamp);
    }

    /// Findings written through the `FindingSink` implementation
    pub fn findings(&self) -> Vec<Finding> {
        self.findings.read().unwrap().clone()
    }

    fn with_inventory<T>(&self, connection_id: u64, f: impl FnOnce(&Inventory) -> T) -> Result<T> {
        let inventories = self.inventories.read().unwrap();
        inventories
            .get(&connection_id)
            .map(f)
            .ok_or_else(|| anyhow!("connection {} not found", connection_id))
    }
}

#[async_trait]
impl InventorySource for MemoryStore {
    async fn get_connection(&self, connection_id: u64) -> Result<ConnectionInfo> {
        self.with_inventory(connection_id, |inv| inv.connection.clone())?
            .ok_or_else(|| anyhow!("connection {} has no connection record", connection_id))
    }

    async fn list_clusters(&self, connection_id: u64) -> Result<Vec<ClusterSnapshot>> {
        self.with_inventory(connection_id, |inv| inv.clusters.clone())
    }

    async fn list_hosts(&self, connection_id: u64) -> Result<Vec<HostSnapshot>> {
        self.with_inventory(connection_id, |inv| inv.hosts.clone())
    }

    async fn list_vms(&self, connection_id: u64) -> Result<Vec<VmSnapshot>> {
        self.with_inventory(connection_id, |inv| inv.vms.clone())
    }
}

#[async_trait]
impl MetricSource for MemoryStore {
    async fn list_metrics(&self, query: &MetricQuery) -> Result<Vec<MetricSample>> {
        let metrics = self.metrics.read().unwrap();
        let Some(series) = metrics.get(&(query.vm_id, query.metric_type)) else {
            return Ok(Vec::new());
        };

        Ok(series
            .iter()
            .filter(|s| query.task_id.is_none() || s.task_id == query.task_id)
            .filter(|s| s.sample.timestamp >= query.start && s.sample.timestamp <= query.end)
            .map(|s| s.sample)
            .collect())
    }
}

#[async_trait]
impl FindingSink for MemoryStore {
    async fn create_finding(&self, finding: Finding) -> Result<()> {
        self.findings.write().unwrap().push(finding);
        Ok(())
    }

    async fn batch_create_findings(&self, findings: Vec<Finding>) -> Result<()> {
        self.findings.write().unwrap().extend(findings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vm(id: u64) -> VmSnapshot {
        VmSnapshot {
            id,
            key: format!("vm-{}", id),
            name: format!("app-{}", id),
            datacenter: "dc1".to_string(),
            host_name: "esx-01".to_string(),
            cpu_count: 4,
            memory_mb: 8192,
            power_state: "poweredOn".to_string(),
        }
    }

    #[test]
    fn test_metric_window_and_task_filter() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let samples: Vec<_> = (0..10)
            .map(|i| MetricSample::new(t0 + Duration::hours(i), i as f64))
            .collect();
        store.insert_metrics(1, MetricType::Cpu, Some(7), samples[..5].to_vec());
        store.insert_metrics(1, MetricType::Cpu, Some(8), samples[5..].to_vec());

        let query = MetricQuery::new(
            1,
            MetricType::Cpu,
            t0 + Duration::hours(2),
            t0 + Duration::hours(8),
        );
        let all = tokio_test::block_on(store.list_metrics(&query)).unwrap();
        assert_eq!(all.len(), 7);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let scoped_query = query.clone().with_task(Some(7));
        let scoped = tokio_test::block_on(store.list_metrics(&scoped_query)).unwrap();
        assert_eq!(scoped.len(), 3);

        let missing = MetricQuery::new(2, MetricType::Cpu, t0, t0 + Duration::days(1));
        assert!(tokio_test::block_on(store.list_metrics(&missing)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_connection_is_error() {
        let store = MemoryStore::new();
        assert!(store.list_vms(42).await.is_err());
        assert!(store.get_connection(42).await.is_err());
    }

    #[tokio::test]
    async fn test_load_snapshot_file() {
        let snapshot = InventorySnapshot {
            connection: Some(ConnectionInfo {
                id: 3,
                name: "vcenter-lab".to_string(),
                platform: "vcenter".to_string(),
                host: "10.0.0.1".to_string(),
            }),
            hosts: vec![HostSnapshot {
                name: "esx-01".to_string(),
                cpu_cores: 32,
                cpu_mhz: 2400,
                memory_bytes: 256 * 1024 * 1024 * 1024,
                num_vms: 1,
            }],
            vms: vec![vm(11)],
            metrics: vec![MetricSeries {
                vm_id: 11,
                metric_type: MetricType::Memory,
                task_id: None,
                samples: vec![MetricSample::new(Utc::now(), 512.0)],
            }],
            ..Default::default()
        };

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&snapshot).unwrap().as_bytes())
            .unwrap();

        let store = MemoryStore::load_json(file.path()).unwrap();
        assert_eq!(store.get_connection(3).await.unwrap().name, "vcenter-lab");
        assert_eq!(store.list_vms(3).await.unwrap().len(), 1);
        assert_eq!(store.list_hosts(3).await.unwrap()[0].cpu_cores, 32);
        assert!(store.list_clusters(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_inserted_after_vms_keeps_inventory() {
        let store = MemoryStore::new();
        store.insert_vm(5, vm(1));
        store.insert_connection(ConnectionInfo {
            id: 5,
            name: "vcenter-dr".to_string(),
            platform: "vcenter".to_string(),
            host: "10.0.0.5".to_string(),
        });

        assert_eq!(store.get_connection(5).await.unwrap().name, "vcenter-dr");
        assert_eq!(store.list_vms(5).await.unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_without_connection_rejected() {
        assert!(MemoryStore::from_snapshot(InventorySnapshot::default()).is_err());
    }
}
