//! Zombie VM detection
//!
//! Scores sustained idleness from average CPU, memory, disk and network
//! usage plus the number of low-usage calendar days in the window.

use super::{stats, AnalysisContext, AnalysisEngine, AnalysisKind};
use crate::error::AnalysisError;
use crate::models::{MetricSample, MetricType, VmIdentity, VmSnapshot};
use crate::source::MetricQuery;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Zombie detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZombieVmConfig {
    pub analysis_days: i32,
    /// Average CPU usage threshold (% of allocated vCPU)
    pub cpu_threshold: f64,
    /// Average memory usage threshold (% of allocated memory)
    pub memory_threshold: f64,
    /// Disk I/O threshold (KB/s)
    pub io_threshold: f64,
    /// Network threshold (KB/s)
    pub network_threshold: f64,
    /// Minimum confidence (0-100) for a VM to be reported
    pub min_confidence: f64,
}

impl Default for ZombieVmConfig {
    fn default() -> Self {
        Self {
            analysis_days: 14,
            cpu_threshold: 5.0,
            memory_threshold: 10.0,
            io_threshold: 10.0,
            network_threshold: 10.0,
            min_confidence: 80.0,
        }
    }
}

impl ZombieVmConfig {
    /// Falls back to the defaults when the window is not positive
    pub fn validated(&self) -> Self {
        if self.analysis_days <= 0 {
            Self::default()
        } else {
            self.clone()
        }
    }
}

/// A VM judged to be idle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZombieVmResult {
    #[serde(flatten)]
    pub vm: VmIdentity,
    /// Average CPU usage (%)
    pub cpu_usage: f64,
    /// Average memory usage (%)
    pub memory_usage: f64,
    /// Average disk I/O (KB/s)
    pub disk_io_rate: f64,
    /// Average network throughput (KB/s)
    pub network_rate: f64,
    /// 0-100
    pub confidence: f64,
    pub days_low_usage: u32,
    pub evidence: Vec<String>,
    pub recommendation: String,
}

/// Per-VM zombie evaluation
pub struct ZombieDetector {
    config: ZombieVmConfig,
}

impl ZombieDetector {
    pub fn new(config: &ZombieVmConfig) -> Self {
        Self {
            config: config.validated(),
        }
    }

    pub fn config(&self) -> &ZombieVmConfig {
        &self.config
    }

    /// Evaluate one VM
    ///
    /// # Arguments
    /// * `cpu`, `memory` - Non-empty series in core-equivalents and MB
    /// * `disk_io`, `network` - Average KB/s over the window
    ///
    /// # Returns
    /// * `Some(ZombieVmResult)` when confidence reaches `min_confidence`
    pub fn evaluate(
        &self,
        ctx: &AnalysisContext,
        vm: &VmSnapshot,
        cpu: &[MetricSample],
        memory: &[MetricSample],
        disk_io: f64,
        network: f64,
    ) -> Option<ZombieVmResult> {
        let cpu_pct = usage_percent(stats::mean_of_samples(cpu), vm.cpu_count);
        let mem_pct = usage_percent(stats::mean_of_samples(memory), vm.memory_mb);

        let abs_cpu_threshold = self.config.cpu_threshold / 100.0 * f64::from(vm.cpu_count);
        let abs_mem_threshold = self.config.memory_threshold / 100.0 * f64::from(vm.memory_mb);
        let low_days = low_usage_days(ctx, cpu, memory, abs_cpu_threshold, abs_mem_threshold);

        let confidence = zombie_confidence(
            cpu_pct,
            mem_pct,
            disk_io,
            network,
            low_days,
            self.config.analysis_days,
        );
        if confidence < self.config.min_confidence {
            return None;
        }

        Some(ZombieVmResult {
            vm: VmIdentity::from(vm),
            cpu_usage: cpu_pct,
            memory_usage: mem_pct,
            disk_io_rate: disk_io,
            network_rate: network,
            confidence,
            days_low_usage: low_days,
            evidence: self.evidence(cpu_pct, mem_pct, disk_io, network, low_days),
            recommendation: recommendation(&vm.name, confidence),
        })
    }

    fn evidence(
        &self,
        cpu_pct: f64,
        mem_pct: f64,
        disk_io: f64,
        network: f64,
        low_days: u32,
    ) -> Vec<String> {
        let cfg = &self.config;
        let mut evidence = Vec::new();

        if cpu_pct < cfg.cpu_threshold {
            evidence.push(format!(
                "Average CPU usage {:.2}% is below the {:.2}% threshold",
                cpu_pct, cfg.cpu_threshold
            ));
        }
        if mem_pct < cfg.memory_threshold {
            evidence.push(format!(
                "Average memory usage {:.2}% is below the {:.2}% threshold",
                mem_pct, cfg.memory_threshold
            ));
        }
        if disk_io < cfg.io_threshold {
            evidence.push(format!(
                "Average disk I/O {:.2} KB/s is below the {:.2} threshold",
                disk_io, cfg.io_threshold
            ));
        }
        if network < cfg.network_threshold {
            evidence.push(format!(
                "Average network throughput {:.2} KB/s is below the {:.2} threshold",
                network, cfg.network_threshold
            ));
        }
        if low_days > 0 {
            evidence.push(format!(
                "{} of the last {} days were low-usage days",
                low_days, cfg.analysis_days
            ));
        }

        evidence
    }
}

fn usage_percent(absolute: f64, capacity: i32) -> f64 {
    if capacity <= 0 {
        return 0.0;
    }
    absolute / f64::from(capacity) * 100.0
}

/// Additive idleness score, capped at 100
///
/// Non-increasing in each of the four usage inputs.
pub fn zombie_confidence(
    cpu_pct: f64,
    mem_pct: f64,
    disk_io: f64,
    network: f64,
    low_days: u32,
    total_days: i32,
) -> f64 {
    let mut score = 0.0;

    score += if cpu_pct < 5.0 {
        40.0
    } else if cpu_pct < 10.0 {
        30.0
    } else if cpu_pct < 20.0 {
        10.0
    } else {
        0.0
    };

    score += if mem_pct < 10.0 {
        30.0
    } else if mem_pct < 20.0 {
        20.0
    } else if mem_pct < 30.0 {
        10.0
    } else {
        0.0
    };

    score += tier_15_5(disk_io);
    score += tier_15_5(network);

    if total_days > 0 {
        let ratio = f64::from(low_days) / f64::from(total_days);
        if ratio > 0.8 {
            score += 10.0;
        } else if ratio > 0.5 {
            score += 5.0;
        }
    }

    f64::min(100.0, score)
}

fn tier_15_5(rate: f64) -> f64 {
    if rate < 10.0 {
        15.0
    } else if rate < 50.0 {
        5.0
    } else {
        0.0
    }
}

/// Calendar days whose average CPU and memory both sit below the thresholds
///
/// A day missing one metric type scores that metric as 0, so a day with
/// only CPU samples passes the memory check.
fn low_usage_days(
    ctx: &AnalysisContext,
    cpu: &[MetricSample],
    memory: &[MetricSample],
    abs_cpu_threshold: f64,
    abs_mem_threshold: f64,
) -> u32 {
    #[derive(Default)]
    struct Day {
        cpu_sum: f64,
        cpu_count: u32,
        mem_sum: f64,
        mem_count: u32,
    }

    let mut days: BTreeMap<NaiveDate, Day> = BTreeMap::new();
    for sample in cpu {
        let day = days.entry(ctx.local(sample.timestamp).date_naive()).or_default();
        day.cpu_sum += sample.value;
        day.cpu_count += 1;
    }
    for sample in memory {
        let day = days.entry(ctx.local(sample.timestamp).date_naive()).or_default();
        day.mem_sum += sample.value;
        day.mem_count += 1;
    }

    days.values()
        .filter(|day| {
            let avg_cpu = if day.cpu_count > 0 {
                day.cpu_sum / f64::from(day.cpu_count)
            } else {
                0.0
            };
            let avg_mem = if day.mem_count > 0 {
                day.mem_sum / f64::from(day.mem_count)
            } else {
                0.0
            };
            avg_cpu < abs_cpu_threshold && avg_mem < abs_mem_threshold
        })
        .count() as u32
}

fn recommendation(vm_name: &str, confidence: f64) -> String {
    if confidence >= 90.0 {
        format!(
            "VM {} is very likely a zombie; recommend shutting it down or deleting it",
            vm_name
        )
    } else if confidence >= 80.0 {
        format!(
            "VM {} is likely a zombie; verify with its owner, then act",
            vm_name
        )
    } else {
        format!("VM {} is possibly a zombie; keep monitoring it", vm_name)
    }
}

impl AnalysisEngine {
    /// Detect idle powered-on VMs of a connection
    pub async fn detect_zombie_vms(
        &self,
        ctx: &AnalysisContext,
        connection_id: u64,
        config: &ZombieVmConfig,
    ) -> Result<Vec<ZombieVmResult>, AnalysisError> {
        let kind = AnalysisKind::Zombie;
        let started = Instant::now();
        let detector = ZombieDetector::new(config);
        let (start, end) = ctx.window(detector.config().analysis_days);

        let vms = self.powered_on_vms(kind, connection_id).await?;
        self.logger
            .log_analysis_started(kind.as_str(), connection_id, vms.len());

        let mut results = Vec::new();
        let mut skipped = 0;
        for (processed, vm) in vms.iter().enumerate() {
            self.check_cancelled(ctx, kind, connection_id, processed, vms.len())?;
            self.telemetry.inc_vms_evaluated(kind.as_str());

            let query = |metric| MetricQuery::new(vm.id, metric, start, end);
            let Some(cpu) = self.required_series(kind, vm, query(MetricType::Cpu)).await else {
                skipped += 1;
                continue;
            };
            let memory_query = query(MetricType::Memory);
            let Some(memory) = self.required_series(kind, vm, memory_query).await else {
                skipped += 1;
                continue;
            };

            let disk_read = self.optional_series(query(MetricType::DiskRead)).await;
            let disk_write = self.optional_series(query(MetricType::DiskWrite)).await;
            let net_rx = self.optional_series(query(MetricType::NetRx)).await;
            let net_tx = self.optional_series(query(MetricType::NetTx)).await;

            let disk_io =
                (stats::mean_of_samples(&disk_read) + stats::mean_of_samples(&disk_write)) / 2.0;
            let network =
                (stats::mean_of_samples(&net_rx) + stats::mean_of_samples(&net_tx)) / 2.0;

            if let Some(result) = detector.evaluate(ctx, vm, &cpu, &memory, disk_io, network) {
                self.logger
                    .log_zombie_detected(&vm.name, result.confidence, result.days_low_usage);
                results.push(result);
            }
        }

        self.finish(kind, connection_id, started, results.len(), skipped);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn vm(cpu_count: i32, memory_mb: i32) -> VmSnapshot {
        VmSnapshot {
            id: 1,
            key: "vm-1".to_string(),
            name: "idle-box".to_string(),
            datacenter: "dc1".to_string(),
            host_name: "esx-01".to_string(),
            cpu_count,
            memory_mb,
            power_state: "poweredOn".to_string(),
        }
    }

    fn hourly(start: chrono::DateTime<Utc>, hours: i64, value: f64) -> Vec<MetricSample> {
        (0..hours)
            .map(|h| MetricSample::new(start + Duration::hours(h), value))
            .collect()
    }

    #[test]
    fn test_confidence_all_idle_is_capped() {
        assert_eq!(zombie_confidence(0.0, 0.0, 0.0, 0.0, 14, 14), 100.0);
    }

    #[test]
    fn test_confidence_busy_vm_scores_zero() {
        assert_eq!(zombie_confidence(50.0, 80.0, 500.0, 500.0, 0, 14), 0.0);
    }

    #[test]
    fn test_confidence_tiers() {
        // cpu 30 + mem 20 + io 5 + net 0 + bonus 5
        assert_eq!(zombie_confidence(7.0, 15.0, 20.0, 60.0, 8, 14), 60.0);
        // zero-day window gives no bonus
        assert_eq!(zombie_confidence(25.0, 35.0, 60.0, 60.0, 3, 0), 0.0);
    }

    #[test]
    fn test_confidence_bounded_and_monotonic() {
        let levels = [0.0, 4.9, 5.0, 9.9, 10.0, 19.9, 20.0, 29.9, 30.0, 49.9, 50.0, 120.0];
        for low_days in [0, 8, 13] {
            for pair in levels.windows(2) {
                let (lo, hi) = (pair[0], pair[1]);
                for fixed in levels {
                    let checks = [
                        (
                            zombie_confidence(lo, fixed, fixed, fixed, low_days, 14),
                            zombie_confidence(hi, fixed, fixed, fixed, low_days, 14),
                        ),
                        (
                            zombie_confidence(fixed, lo, fixed, fixed, low_days, 14),
                            zombie_confidence(fixed, hi, fixed, fixed, low_days, 14),
                        ),
                        (
                            zombie_confidence(fixed, fixed, lo, fixed, low_days, 14),
                            zombie_confidence(fixed, fixed, hi, fixed, low_days, 14),
                        ),
                        (
                            zombie_confidence(fixed, fixed, fixed, lo, low_days, 14),
                            zombie_confidence(fixed, fixed, fixed, hi, low_days, 14),
                        ),
                    ];
                    for (before, after) in checks {
                        assert!((0.0..=100.0).contains(&before));
                        assert!(after <= before, "{} rose to {}", before, after);
                    }
                }
            }
        }
    }

    #[test]
    fn test_invalid_window_uses_defaults() {
        let config = ZombieVmConfig {
            analysis_days: 0,
            cpu_threshold: 50.0,
            ..ZombieVmConfig::default()
        };
        assert_eq!(ZombieDetector::new(&config).config(), &ZombieVmConfig::default());
    }

    #[test]
    fn test_low_usage_days_requires_both_metrics_low() {
        let ctx = AnalysisContext::at(Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap());
        let day1 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let day2 = day1 + Duration::days(1);

        let mut cpu = hourly(day1, 24, 0.1);
        cpu.extend(hourly(day2, 24, 3.0));
        let mut memory = hourly(day1, 24, 100.0);
        memory.extend(hourly(day2, 24, 100.0));

        // thresholds: 0.2 cores, 819.2 MB
        assert_eq!(low_usage_days(&ctx, &cpu, &memory, 0.2, 819.2), 1);
    }

    #[test]
    fn test_day_without_memory_counts_memory_as_zero() {
        let ctx = AnalysisContext::at(Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap());
        let day1 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let day2 = day1 + Duration::days(1);

        let mut cpu = hourly(day1, 24, 0.1);
        cpu.extend(hourly(day2, 24, 0.1));
        // Memory only on day 1, and it is high
        let memory = hourly(day1, 24, 4000.0);

        assert_eq!(low_usage_days(&ctx, &cpu, &memory, 0.2, 819.2), 1);
    }

    #[test]
    fn test_evaluate_reports_evidence_and_tier() {
        let ctx = AnalysisContext::at(Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap());
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let vm = vm(4, 8192);
        let cpu = hourly(start, 14 * 24, 0.08);
        let memory = hourly(start, 14 * 24, 409.6);

        let detector = ZombieDetector::new(&ZombieVmConfig::default());
        let result = detector
            .evaluate(&ctx, &vm, &cpu, &memory, 0.0, 0.0)
            .expect("idle VM should be reported");

        assert!((result.cpu_usage - 2.0).abs() < 1e-9);
        assert!((result.memory_usage - 5.0).abs() < 1e-9);
        assert_eq!(result.days_low_usage, 14);
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.evidence.len(), 5);
        assert!(result.recommendation.contains("very likely"));
    }

    #[test]
    fn test_evaluate_below_min_confidence() {
        let ctx = AnalysisContext::at(Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap());
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let vm = vm(4, 8192);
        let cpu = hourly(start, 48, 3.0);
        let memory = hourly(start, 48, 6000.0);

        let detector = ZombieDetector::new(&ZombieVmConfig::default());
        assert!(detector
            .evaluate(&ctx, &vm, &cpu, &memory, 100.0, 100.0)
            .is_none());
    }

    #[test]
    fn test_zero_capacity_reads_as_idle() {
        assert_eq!(usage_percent(3.0, 0), 0.0);
        assert_eq!(usage_percent(1.0, 4), 25.0);
    }

    #[test]
    fn test_recommendation_tiers() {
        assert!(recommendation("a", 95.0).contains("very likely"));
        assert!(recommendation("a", 85.0).contains("is likely"));
        assert!(recommendation("a", 60.0).contains("possibly"));
    }
}
