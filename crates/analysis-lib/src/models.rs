//! Core data models read by the analyzers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Power state reported by the platform for a running VM
pub const POWERED_ON: &str = "poweredOn";

/// Virtualization platform connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub host: String,
}

/// Cluster inventory snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub name: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub total_cpu_mhz: i64,
    #[serde(default)]
    pub total_memory_bytes: i64,
    #[serde(default)]
    pub num_hosts: i32,
    #[serde(default)]
    pub num_vms: i32,
}

/// Physical host inventory snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub name: String,
    pub cpu_cores: i32,
    #[serde(default)]
    pub cpu_mhz: i32,
    pub memory_bytes: i64,
    pub num_vms: i32,
}

impl HostSnapshot {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Virtual machine inventory snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSnapshot {
    /// Store identifier used to key metric series
    pub id: u64,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub host_name: String,
    pub cpu_count: i32,
    pub memory_mb: i32,
    pub power_state: String,
}

impl VmSnapshot {
    pub fn is_powered_on(&self) -> bool {
        self.power_state == POWERED_ON
    }
}

/// Metric kinds collected per VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Absolute core-equivalents
    Cpu,
    /// Megabytes
    Memory,
    /// KB/s
    DiskRead,
    DiskWrite,
    NetRx,
    NetTx,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Cpu => "cpu",
            MetricType::Memory => "memory",
            MetricType::DiskRead => "disk_read",
            MetricType::DiskWrite => "disk_write",
            MetricType::NetRx => "net_rx",
            MetricType::NetTx => "net_tx",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single utilization sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl MetricSample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Identity fields shared by every per-VM result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmIdentity {
    pub vm_key: String,
    pub vm_name: String,
    pub datacenter: String,
    pub host: String,
    pub cpu_count: i32,
    pub memory_mb: i32,
    pub power_state: String,
}

impl From<&VmSnapshot> for VmIdentity {
    fn from(vm: &VmSnapshot) -> Self {
        Self {
            vm_key: vm.key.clone(),
            vm_name: vm.name.clone(),
            datacenter: vm.datacenter.clone(),
            host: vm.host_name.clone(),
            cpu_count: vm.cpu_count,
            memory_mb: vm.memory_mb,
            power_state: vm.power_state.clone(),
        }
    }
}
