//! Platform health scoring
//!
//! Three 0-100 dimensions computed from inventory alone, combined with
//! configurable weights:
//! - resource balance: spread of VM counts across hosts
//! - overcommit risk: provisioned vs physical CPU and memory
//! - hotspot concentration: Gini coefficient of per-host load

use super::{stats, AnalysisContext, AnalysisEngine, AnalysisKind};
use crate::error::AnalysisError;
use crate::models::{ClusterSnapshot, ConnectionInfo, HostSnapshot, VmSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// More small powered-on VMs than this triggers a zombie audit suggestion
pub const SMALL_VM_AUDIT_THRESHOLD: usize = 5;

/// Average VMs per host above which capacity expansion is suggested
pub const CAPACITY_VMS_PER_HOST: f64 = 50.0;

const SMALL_VM_MAX_CPU: i32 = 2;
const SMALL_VM_MAX_MEMORY_MB: i32 = 2048;

/// Memory (MB) counted as one unit of host load
const LOAD_MEMORY_UNIT_MB: f64 = 8192.0;

const CPU_IDEAL_OVERCOMMIT: (f64, f64) = (2.0, 4.0);
const MEMORY_IDEAL_OVERCOMMIT: (f64, f64) = (1.5, 2.5);

const RISK_SCORE_THRESHOLD: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub resource_balance_weight: f64,
    pub overcommit_risk_weight: f64,
    pub hotspot_weight: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            resource_balance_weight: 0.4,
            overcommit_risk_weight: 0.3,
            hotspot_weight: 0.3,
        }
    }
}

impl HealthConfig {
    /// Default weights when any weight is negative or all are zero
    pub fn validated(&self) -> Self {
        let weights = [
            self.resource_balance_weight,
            self.overcommit_risk_weight,
            self.hotspot_weight,
        ];
        let invalid = weights.iter().any(|w| *w < 0.0 || !w.is_finite())
            || weights.iter().all(|w| *w == 0.0);
        if invalid {
            Self::default()
        } else {
            self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Excellent,
    Good,
    Fair,
    Poor,
    Bad,
}

impl HealthLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthLevel::Excellent
        } else if score >= 75.0 {
            HealthLevel::Good
        } else if score >= 60.0 {
            HealthLevel::Fair
        } else if score >= 40.0 {
            HealthLevel::Poor
        } else {
            HealthLevel::Bad
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLevel::Excellent => "excellent",
            HealthLevel::Good => "good",
            HealthLevel::Fair => "fair",
            HealthLevel::Poor => "poor",
            HealthLevel::Bad => "bad",
        }
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthScoreResult {
    pub connection_id: u64,
    pub connection_name: String,

    pub overall_score: f64,
    pub health_level: HealthLevel,

    pub resource_balance: f64,
    pub overcommit_risk: f64,
    pub hotspot_concentration: f64,

    pub total_clusters: usize,
    pub total_hosts: usize,
    pub total_vms: usize,
    pub total_cpu_cores: i64,
    pub total_memory_gb: f64,

    pub risk_items: Vec<String>,
    pub recommendations: Vec<String>,
}

pub struct HealthScorer {
    config: HealthConfig,
}

impl HealthScorer {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            config: config.validated(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Score one connection's inventory
    ///
    /// Powered-off VMs count toward totals and VM density but not toward
    /// host load or overcommit.
    pub fn score(
        &self,
        connection: &ConnectionInfo,
        clusters: &[ClusterSnapshot],
        hosts: &[HostSnapshot],
        vms: &[VmSnapshot],
    ) -> HealthScoreResult {
        let resource_balance = resource_balance(hosts);
        let overcommit_risk = overcommit_risk(hosts, vms);
        let hotspot_concentration = hotspot_concentration(hosts, vms);

        let cfg = &self.config;
        let overall_score = resource_balance * cfg.resource_balance_weight
            + overcommit_risk * cfg.overcommit_risk_weight
            + hotspot_concentration * cfg.hotspot_weight;

        let risk_items = risk_items(resource_balance, overcommit_risk, hotspot_concentration);
        let recommendations = recommendations(&risk_items, hosts, vms);

        HealthScoreResult {
            connection_id: connection.id,
            connection_name: connection.name.clone(),
            overall_score,
            health_level: HealthLevel::from_score(overall_score),
            resource_balance,
            overcommit_risk,
            hotspot_concentration,
            total_clusters: clusters.len(),
            total_hosts: hosts.len(),
            total_vms: vms.len(),
            total_cpu_cores: hosts.iter().map(|h| i64::from(h.cpu_cores)).sum(),
            total_memory_gb: hosts
                .iter()
                .map(|h| h.memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0))
                .sum(),
            risk_items,
            recommendations,
        }
    }
}

/// CV of per-host VM counts mapped onto a fixed ladder
fn resource_balance(hosts: &[HostSnapshot]) -> f64 {
    let counts: Vec<f64> = hosts.iter().map(|h| f64::from(h.num_vms)).collect();
    if counts.is_empty() || stats::mean(&counts) <= 0.0 {
        return 0.0;
    }

    let cv = stats::std_dev(&counts) / stats::mean(&counts);
    if cv < 0.3 {
        100.0
    } else if cv < 0.5 {
        80.0
    } else if cv < 0.8 {
        60.0
    } else if cv < 1.2 {
        40.0
    } else {
        20.0
    }
}

fn overcommit_risk(hosts: &[HostSnapshot], vms: &[VmSnapshot]) -> f64 {
    if hosts.is_empty() {
        return 50.0;
    }

    let (vm_cpus, vm_memory_mb) = vms
        .iter()
        .filter(|vm| vm.is_powered_on())
        .fold((0i64, 0i64), |(cpu, mem), vm| {
            (cpu + i64::from(vm.cpu_count), mem + i64::from(vm.memory_mb))
        });
    let host_cpus: i64 = hosts.iter().map(|h| i64::from(h.cpu_cores)).sum();
    let host_memory_mb: f64 = hosts.iter().map(HostSnapshot::memory_mb).sum();

    let cpu_ratio = if host_cpus > 0 {
        vm_cpus as f64 / host_cpus as f64
    } else {
        1.0
    };
    let memory_ratio = if host_memory_mb > 0.0 {
        vm_memory_mb as f64 / host_memory_mb
    } else {
        1.0
    };

    let (cpu_min, cpu_max) = CPU_IDEAL_OVERCOMMIT;
    let (mem_min, mem_max) = MEMORY_IDEAL_OVERCOMMIT;
    let cpu_score = overcommit_score(cpu_ratio, cpu_min, cpu_max);
    let memory_score = overcommit_score(memory_ratio, mem_min, mem_max);
    (cpu_score + memory_score) / 2.0
}

/// Piecewise score of an overcommit ratio against its ideal range
///
/// Under-provisioning scales linearly up to 50, the ideal range scores 100,
/// and over-provisioning decays toward 40 at twice the upper bound and
/// further beyond it. Clamped to [0, 100].
pub fn overcommit_score(ratio: f64, min_ideal: f64, max_ideal: f64) -> f64 {
    let score = if ratio < min_ideal {
        ratio / min_ideal * 50.0
    } else if ratio <= max_ideal {
        100.0
    } else if ratio <= max_ideal * 2.0 {
        100.0 - (ratio - max_ideal) / max_ideal * 30.0
    } else {
        40.0 - (ratio - max_ideal * 2.0) / max_ideal * 20.0
    };
    score.clamp(0.0, 100.0)
}

/// `(1 - gini) * 100` over per-host load, idle hosts included
fn hotspot_concentration(hosts: &[HostSnapshot], vms: &[VmSnapshot]) -> f64 {
    if hosts.is_empty() {
        return 50.0;
    }

    let index: HashMap<&str, usize> = hosts
        .iter()
        .enumerate()
        .map(|(i, h)| (h.name.as_str(), i))
        .collect();
    let mut loads = vec![0.0; hosts.len()];
    for vm in vms.iter().filter(|vm| vm.is_powered_on()) {
        if let Some(&i) = index.get(vm.host_name.as_str()) {
            loads[i] += f64::from(vm.cpu_count) + f64::from(vm.memory_mb) / LOAD_MEMORY_UNIT_MB;
        }
    }

    if loads.iter().all(|load| *load <= 0.0) {
        return 100.0;
    }
    (1.0 - stats::gini(&loads)) * 100.0
}

fn risk_items(
    resource_balance: f64,
    overcommit_risk: f64,
    hotspot_concentration: f64,
) -> Vec<String> {
    let mut risks = Vec::new();
    if resource_balance < RISK_SCORE_THRESHOLD {
        risks.push(
            "VMs are unevenly distributed; some hosts carry far more load than others"
                .to_string(),
        );
    }
    if overcommit_risk < RISK_SCORE_THRESHOLD {
        risks.push(
            "Overcommit ratio is outside the ideal range, risking wasted capacity or contention"
                .to_string(),
        );
    }
    if hotspot_concentration < RISK_SCORE_THRESHOLD {
        risks.push("Load is concentrated on a few hotspot hosts".to_string());
    }
    risks
}

fn recommendations(risks: &[String], hosts: &[HostSnapshot], vms: &[VmSnapshot]) -> Vec<String> {
    let mut recommendations = Vec::new();

    if !risks.is_empty() {
        recommendations.push("Rebalance VMs across hosts to even out the load".to_string());
    }

    let small_vms = vms
        .iter()
        .filter(|vm| {
            vm.is_powered_on()
                && vm.cpu_count <= SMALL_VM_MAX_CPU
                && vm.memory_mb <= SMALL_VM_MAX_MEMORY_MB
        })
        .count();
    if small_vms > SMALL_VM_AUDIT_THRESHOLD {
        recommendations.push(format!(
            "Found {} small powered-on VMs; run a zombie VM analysis",
            small_vms
        ));
    }

    if !hosts.is_empty() && vms.len() as f64 / hosts.len() as f64 > CAPACITY_VMS_PER_HOST {
        recommendations.push(
            "Hosts run a high number of VMs on average; consider adding capacity".to_string(),
        );
    }

    recommendations
}

impl AnalysisEngine {
    /// Score the health of one connection
    ///
    /// Any inventory lookup failure fails the call.
    pub async fn analyze_health_score(
        &self,
        _ctx: &AnalysisContext,
        connection_id: u64,
        config: &HealthConfig,
    ) -> Result<HealthScoreResult, AnalysisError> {
        let kind = AnalysisKind::Health;
        let started = Instant::now();
        let scorer = HealthScorer::new(config);
        let fail = |what, e| self.fail(kind, connection_id, AnalysisError::inventory(what, e));

        let connection = self
            .inventory
            .get_connection(connection_id)
            .await
            .map_err(|e| fail("get connection", e))?;
        let clusters = self
            .inventory
            .list_clusters(connection_id)
            .await
            .map_err(|e| fail("list clusters", e))?;
        let hosts = self
            .inventory
            .list_hosts(connection_id)
            .await
            .map_err(|e| fail("list hosts", e))?;
        let vms = self
            .inventory
            .list_vms(connection_id)
            .await
            .map_err(|e| fail("list VMs", e))?;

        self.logger
            .log_analysis_started(kind.as_str(), connection_id, vms.len());
        let result = scorer.score(&connection, &clusters, &hosts, &vms);

        self.finish(kind, connection_id, started, 1, 0);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, num_vms: i32) -> HostSnapshot {
        HostSnapshot {
            name: name.to_string(),
            cpu_cores: 16,
            cpu_mhz: 2400,
            memory_bytes: 64 * 1024 * 1024 * 1024,
            num_vms,
        }
    }

    fn vm(name: &str, host: &str, cpu_count: i32, memory_mb: i32, on: bool) -> VmSnapshot {
        VmSnapshot {
            id: 0,
            key: format!("key-{}", name),
            name: name.to_string(),
            datacenter: "dc1".to_string(),
            host_name: host.to_string(),
            cpu_count,
            memory_mb,
            power_state: if on { "poweredOn" } else { "poweredOff" }.to_string(),
        }
    }

    fn connection() -> ConnectionInfo {
        ConnectionInfo {
            id: 1,
            name: "vcenter-lab".to_string(),
            platform: "vcenter".to_string(),
            host: "10.0.0.1".to_string(),
        }
    }

    #[test]
    fn test_overcommit_score_pieces() {
        assert_eq!(overcommit_score(1.0, 2.0, 4.0), 25.0);
        assert_eq!(overcommit_score(3.0, 2.0, 4.0), 100.0);
        assert_eq!(overcommit_score(6.0, 2.0, 4.0), 85.0);
        assert_eq!(overcommit_score(8.0, 2.0, 4.0), 70.0);
        assert_eq!(overcommit_score(12.0, 2.0, 4.0), 20.0);
        assert_eq!(overcommit_score(16.0, 2.0, 4.0), 0.0);
    }

    #[test]
    fn test_overcommit_score_clamped() {
        for ratio in [0.0, 0.5, 10.0, 40.0, 1_000.0] {
            let score = overcommit_score(ratio, 1.5, 2.5);
            assert!((0.0..=100.0).contains(&score), "ratio {} scored {}", ratio, score);
        }
        assert_eq!(overcommit_score(1_000.0, 2.0, 4.0), 0.0);
    }

    #[test]
    fn test_resource_balance_ladder() {
        assert_eq!(resource_balance(&[]), 0.0);
        assert_eq!(resource_balance(&[host("a", 0), host("b", 0)]), 0.0);
        assert_eq!(resource_balance(&[host("a", 10), host("b", 10)]), 100.0);
        // cv = 0.5
        assert_eq!(resource_balance(&[host("a", 5), host("b", 15)]), 60.0);
        // cv = 1.0
        assert_eq!(resource_balance(&[host("a", 0), host("b", 20)]), 40.0);
    }

    #[test]
    fn test_hotspot_even_load_scores_full() {
        let hosts = [host("a", 1), host("b", 1), host("c", 1)];
        let vms = [
            vm("v1", "a", 4, 8192, true),
            vm("v2", "b", 4, 8192, true),
            vm("v3", "c", 4, 8192, true),
        ];
        assert!((hotspot_concentration(&hosts, &vms) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_hotspot_single_loaded_host_approaches_zero() {
        let mut previous = f64::MAX;
        for n in [2usize, 5, 10, 50] {
            let hosts: Vec<HostSnapshot> = (0..n).map(|i| host(&format!("h{}", i), 0)).collect();
            let vms = [vm("v1", "h0", 8, 16384, true)];
            let score = hotspot_concentration(&hosts, &vms);

            assert!((score - 100.0 / n as f64).abs() < 1e-9);
            assert!(score < previous);
            previous = score;
        }
    }

    #[test]
    fn test_hotspot_edge_cases() {
        assert_eq!(hotspot_concentration(&[], &[]), 50.0);
        let hosts = [host("a", 0), host("b", 0)];
        assert_eq!(hotspot_concentration(&hosts, &[]), 100.0);
        // Powered-off load is ignored
        let vms = [vm("v1", "a", 8, 8192, false)];
        assert_eq!(hotspot_concentration(&hosts, &vms), 100.0);
    }

    #[test]
    fn test_weights_fallback() {
        let zero = HealthConfig {
            resource_balance_weight: 0.0,
            overcommit_risk_weight: 0.0,
            hotspot_weight: 0.0,
        };
        assert_eq!(zero.validated(), HealthConfig::default());

        let negative = HealthConfig {
            hotspot_weight: -0.1,
            ..HealthConfig::default()
        };
        assert_eq!(negative.validated(), HealthConfig::default());

        let custom = HealthConfig {
            resource_balance_weight: 1.0,
            overcommit_risk_weight: 0.0,
            hotspot_weight: 0.0,
        };
        assert_eq!(custom.validated(), custom);
    }

    #[test]
    fn test_health_levels() {
        assert_eq!(HealthLevel::from_score(95.0), HealthLevel::Excellent);
        assert_eq!(HealthLevel::from_score(75.0), HealthLevel::Good);
        assert_eq!(HealthLevel::from_score(60.0), HealthLevel::Fair);
        assert_eq!(HealthLevel::from_score(40.0), HealthLevel::Poor);
        assert_eq!(HealthLevel::from_score(39.9), HealthLevel::Bad);
    }

    #[test]
    fn test_score_healthy_estate() {
        // 2 hosts x 16 cores / 64 GB; 3x overcommit CPU, 2x memory
        let hosts = [host("a", 6), host("b", 6)];
        let vms: Vec<VmSnapshot> = (0..12)
            .map(|i| {
                let h = if i % 2 == 0 { "a" } else { "b" };
                vm(&format!("v{}", i), h, 8, 21846, true)
            })
            .collect();

        let result =
            HealthScorer::new(&HealthConfig::default()).score(&connection(), &[], &hosts, &vms);
        assert_eq!(result.resource_balance, 100.0);
        assert_eq!(result.overcommit_risk, 100.0);
        assert!((result.hotspot_concentration - 100.0).abs() < 1e-9);
        assert_eq!(result.health_level, HealthLevel::Excellent);
        assert!(result.risk_items.is_empty());
        assert!(result.recommendations.is_empty());
        assert_eq!(result.total_cpu_cores, 32);
        assert!((result.total_memory_gb - 128.0).abs() < 1e-9);
        assert_eq!(result.connection_name, "vcenter-lab");
    }

    #[test]
    fn test_score_unhealthy_estate_recommendations() {
        let hosts = [host("a", 8), host("b", 0)];
        let mut vms: Vec<VmSnapshot> = (0..6)
            .map(|i| vm(&format!("small{}", i), "a", 1, 1024, true))
            .collect();
        vms.push(vm("big", "a", 16, 65536, true));
        vms.push(vm("off", "b", 2, 2048, false));

        let result =
            HealthScorer::new(&HealthConfig::default()).score(&connection(), &[], &hosts, &vms);
        assert_eq!(result.resource_balance, 40.0);
        assert!(result.hotspot_concentration < RISK_SCORE_THRESHOLD);
        assert_eq!(result.risk_items.len(), 3);
        assert_eq!(result.recommendations.len(), 2);
        assert!(result.recommendations[1].contains("Found 6 small"));
        assert_eq!(result.total_vms, 8);
    }

    #[test]
    fn test_capacity_recommendation_counts_powered_off_vms() {
        let hosts = [host("a", 51)];
        let vms: Vec<VmSnapshot> = (0..51)
            .map(|i| vm(&format!("v{}", i), "a", 4, 4096, i % 2 == 0))
            .collect();
        let recs = recommendations(&[], &hosts, &vms);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("adding capacity"));
    }
}
