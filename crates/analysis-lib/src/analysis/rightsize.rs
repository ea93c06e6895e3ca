//! Right-size advisor
//!
//! Recommends a vCPU count and memory size from a high percentile of the
//! observed usage times a safety buffer, snapped to standard sizes.

use super::{stats, AnalysisContext, AnalysisEngine, AnalysisKind};
use crate::error::AnalysisError;
use crate::models::{MetricSample, MetricType, VmIdentity, VmSnapshot};
use crate::source::MetricQuery;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Standard vCPU sizes; anything above the last entry is clamped to it
pub const CPU_LADDER: [i32; 12] = [1, 2, 4, 8, 12, 16, 24, 32, 48, 64, 96, 128];

/// Expected samples per day at a 5-minute collection interval
pub const SAMPLES_PER_DAY: u32 = 288;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RightSizeConfig {
    pub analysis_days: i32,
    /// Total multiplier over the observed percentile (1.2 = 20% headroom)
    pub buffer_ratio: f64,
    /// Percentile used as the sizing basis
    pub p95_threshold: f64,
    pub small_margin: f64,
    pub large_margin: f64,
}

impl Default for RightSizeConfig {
    fn default() -> Self {
        Self {
            analysis_days: 7,
            buffer_ratio: 1.2,
            p95_threshold: 95.0,
            small_margin: 0.3,
            large_margin: 0.7,
        }
    }
}

impl RightSizeConfig {
    /// Defaults for a non-positive window; a fractional buffer such as `0.2`
    /// is read as headroom and becomes `1.2`
    pub fn validated(&self) -> Self {
        let mut config = if self.analysis_days <= 0 {
            Self::default()
        } else {
            self.clone()
        };
        if config.buffer_ratio < 1.0 {
            config.buffer_ratio += 1.0;
        }
        config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    LargeDownsize,
    SmallDownsize,
    Keep,
    SmallUpsize,
    LargeUpsize,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentType::LargeDownsize => "large downsize",
            AdjustmentType::SmallDownsize => "small downsize",
            AdjustmentType::Keep => "keep",
            AdjustmentType::SmallUpsize => "small upsize",
            AdjustmentType::LargeUpsize => "large upsize",
        }
    }

    pub fn is_large(&self) -> bool {
        matches!(self, AdjustmentType::LargeDownsize | AdjustmentType::LargeUpsize)
    }

    fn classify(avg_ratio: f64, config: &RightSizeConfig) -> Self {
        if avg_ratio <= 1.0 - config.large_margin {
            AdjustmentType::LargeDownsize
        } else if avg_ratio <= 1.0 - config.small_margin {
            AdjustmentType::SmallDownsize
        } else if avg_ratio >= 1.0 + config.large_margin {
            AdjustmentType::LargeUpsize
        } else if avg_ratio >= 1.0 + config.small_margin {
            AdjustmentType::SmallUpsize
        } else {
            AdjustmentType::Keep
        }
    }
}

impl fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered so the more severe of two levels is their `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    fn from_volatility(percent: f64) -> Self {
        if percent > 40.0 {
            RiskLevel::High
        } else if percent > 20.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RightSizeResult {
    #[serde(flatten)]
    pub vm: VmIdentity,
    pub current_cpu: i32,
    pub current_memory_mb: i32,

    pub cpu_p95: f64,
    pub cpu_peak: f64,
    pub cpu_avg: f64,
    pub memory_p95: f64,
    pub memory_peak: f64,
    pub memory_avg: f64,

    pub recommended_cpu: i32,
    pub recommended_memory_mb: i32,
    pub adjustment_type: AdjustmentType,

    pub risk_level: RiskLevel,
    pub estimated_saving: String,
    pub confidence: f64,
}

pub struct RightSizeAdvisor {
    config: RightSizeConfig,
}

impl RightSizeAdvisor {
    pub fn new(config: &RightSizeConfig) -> Self {
        Self {
            config: config.validated(),
        }
    }

    pub fn config(&self) -> &RightSizeConfig {
        &self.config
    }

    /// Size one VM from its non-empty cpu (cores) and memory (MB) series
    pub fn recommend(
        &self,
        vm: &VmSnapshot,
        cpu: &[MetricSample],
        memory: &[MetricSample],
    ) -> RightSizeResult {
        let cfg = &self.config;
        let cpu_values = stats::values(cpu);
        let mem_values = stats::values(memory);

        let cpu_p95 = stats::percentile(&cpu_values, cfg.p95_threshold);
        let memory_p95 = stats::percentile(&mem_values, cfg.p95_threshold);

        let recommended_cpu = normalize_cpu(ceil_to_i32(cpu_p95 * cfg.buffer_ratio));
        let recommended_memory_mb = normalize_memory(ceil_to_i32(memory_p95 * cfg.buffer_ratio));

        let avg_ratio = (capacity_ratio(recommended_cpu, vm.cpu_count)
            + capacity_ratio(recommended_memory_mb, vm.memory_mb))
            / 2.0;

        let risk_level = std::cmp::max(
            RiskLevel::from_volatility(volatility_percent(&cpu_values, vm.cpu_count)),
            RiskLevel::from_volatility(volatility_percent(&mem_values, vm.memory_mb)),
        );

        RightSizeResult {
            vm: VmIdentity::from(vm),
            current_cpu: vm.cpu_count,
            current_memory_mb: vm.memory_mb,
            cpu_p95,
            cpu_peak: stats::max(&cpu_values),
            cpu_avg: stats::mean(&cpu_values),
            memory_p95,
            memory_peak: stats::max(&mem_values),
            memory_avg: stats::mean(&mem_values),
            recommended_cpu,
            recommended_memory_mb,
            adjustment_type: AdjustmentType::classify(avg_ratio, cfg),
            risk_level,
            estimated_saving: estimate_saving(
                vm.cpu_count,
                recommended_cpu,
                vm.memory_mb,
                recommended_memory_mb,
            ),
            confidence: sample_confidence(cpu_values.len(), mem_values.len(), cfg.analysis_days),
        }
    }
}

fn ceil_to_i32(value: f64) -> i32 {
    // `as` saturates and maps NaN to 0
    value.ceil() as i32
}

/// Round up to the first standard vCPU size, clamped at 128
pub fn normalize_cpu(cpu: i32) -> i32 {
    CPU_LADDER
        .iter()
        .copied()
        .find(|&size| cpu <= size)
        .unwrap_or(CPU_LADDER[CPU_LADDER.len() - 1])
}

/// Round up to a standard memory size in MB
///
/// Minimum 512; 512 MB steps below 4 GB, 1 GB steps below 16 GB,
/// 2 GB steps above.
pub fn normalize_memory(memory_mb: i32) -> i32 {
    if memory_mb < 512 {
        return 512;
    }
    let mb = i64::from(memory_mb);
    let step = if mb < 4096 {
        512
    } else if mb < 16384 {
        1024
    } else {
        2048
    };
    let rounded = (mb + step - 1) / step * step;
    i32::try_from(rounded).unwrap_or(i32::MAX)
}

fn capacity_ratio(recommended: i32, current: i32) -> f64 {
    if current <= 0 {
        return 1.0;
    }
    f64::from(recommended) / f64::from(current)
}

fn volatility_percent(values: &[f64], capacity: i32) -> f64 {
    if capacity <= 0 {
        return 0.0;
    }
    stats::std_dev(values) / f64::from(capacity) * 100.0
}

fn estimate_saving(current_cpu: i32, rec_cpu: i32, current_mem: i32, rec_mem: i32) -> String {
    let cpu_saving = (1.0 - capacity_ratio(rec_cpu, current_cpu)) * 100.0;
    let mem_saving = (1.0 - capacity_ratio(rec_mem, current_mem)) * 100.0;

    if cpu_saving <= 0.0 && mem_saving <= 0.0 {
        return "no saving (requires upsizing)".to_string();
    }
    format!("about {:.1}%", (cpu_saving + mem_saving) / 2.0)
}

fn sample_confidence(cpu_samples: usize, mem_samples: usize, analysis_days: i32) -> f64 {
    let expected = f64::from(analysis_days.max(1)) * f64::from(SAMPLES_PER_DAY);
    let ratio = (cpu_samples + mem_samples) as f64 / (2.0 * expected);
    f64::min(100.0, ratio * 100.0)
}

impl AnalysisEngine {
    /// Right-size every powered-on VM of a connection
    ///
    /// `task_id` restricts metrics to one collection run when set.
    pub async fn analyze_right_size(
        &self,
        ctx: &AnalysisContext,
        connection_id: u64,
        task_id: Option<u64>,
        config: &RightSizeConfig,
    ) -> Result<Vec<RightSizeResult>, AnalysisError> {
        let kind = AnalysisKind::RightSize;
        let started = Instant::now();
        let advisor = RightSizeAdvisor::new(config);
        let (start, end) = ctx.window(advisor.config().analysis_days);

        let vms = self.powered_on_vms(kind, connection_id).await?;
        self.logger
            .log_analysis_started(kind.as_str(), connection_id, vms.len());

        let mut results = Vec::new();
        let mut skipped = 0;
        for (processed, vm) in vms.iter().enumerate() {
            self.check_cancelled(ctx, kind, connection_id, processed, vms.len())?;
            self.telemetry.inc_vms_evaluated(kind.as_str());

            let query = |metric| MetricQuery::new(vm.id, metric, start, end).with_task(task_id);
            let Some(cpu) = self.required_series(kind, vm, query(MetricType::Cpu)).await else {
                skipped += 1;
                continue;
            };
            let memory_query = query(MetricType::Memory);
            let Some(memory) = self.required_series(kind, vm, memory_query).await else {
                skipped += 1;
                continue;
            };

            results.push(advisor.recommend(vm, &cpu, &memory));
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
            id: 7,
            key: "vm-7".to_string(),
            name: "web-7".to_string(),
            datacenter: "dc1".to_string(),
            host_name: "esx-02".to_string(),
            cpu_count,
            memory_mb,
            power_state: "poweredOn".to_string(),
        }
    }

    fn series(values: &[f64]) -> Vec<MetricSample> {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| MetricSample::new(start + Duration::minutes(5 * i as i64), v))
            .collect()
    }

    #[test]
    fn test_normalize_cpu_ladder() {
        assert_eq!(normalize_cpu(0), 1);
        assert_eq!(normalize_cpu(-3), 1);
        assert_eq!(normalize_cpu(3), 4);
        assert_eq!(normalize_cpu(9), 12);
        assert_eq!(normalize_cpu(48), 48);
        assert_eq!(normalize_cpu(129), 128);
    }

    #[test]
    fn test_normalize_memory_tiers() {
        assert_eq!(normalize_memory(0), 512);
        assert_eq!(normalize_memory(512), 512);
        assert_eq!(normalize_memory(513), 1024);
        assert_eq!(normalize_memory(1025), 1536);
        assert_eq!(normalize_memory(4097), 5120);
        assert_eq!(normalize_memory(16385), 18432);
        assert_eq!(normalize_memory(i32::MAX), i32::MAX);
    }

    #[test]
    fn test_fractional_buffer_is_headroom() {
        let config = RightSizeConfig {
            buffer_ratio: 0.2,
            ..RightSizeConfig::default()
        };
        assert!((config.validated().buffer_ratio - 1.2).abs() < 1e-9);

        let invalid = RightSizeConfig {
            analysis_days: -1,
            buffer_ratio: 2.0,
            ..RightSizeConfig::default()
        };
        assert_eq!(invalid.validated(), RightSizeConfig::default());
    }

    #[test]
    fn test_oversized_vm_gets_large_downsize() {
        let advisor = RightSizeAdvisor::new(&RightSizeConfig::default());
        let result = advisor.recommend(&vm(4, 16384), &series(&[1.0; 20]), &series(&[1000.0; 20]));

        assert_eq!(result.cpu_p95, 1.0);
        assert_eq!(result.recommended_cpu, 2);
        assert_eq!(result.recommended_memory_mb, 1536);
        assert_eq!(result.adjustment_type, AdjustmentType::LargeDownsize);
        assert_eq!(result.adjustment_type.to_string(), "large downsize");
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(result.estimated_saving.starts_with("about "));
    }

    #[test]
    fn test_busy_vm_needs_upsize() {
        let advisor = RightSizeAdvisor::new(&RightSizeConfig::default());
        let result = advisor.recommend(&vm(2, 2048), &series(&[3.5; 10]), &series(&[3000.0; 10]));

        // 3.5 * 1.2 = 4.2 -> 5 -> 8 vCPU; 3600 MB -> 4096 MB
        assert_eq!(result.recommended_cpu, 8);
        assert_eq!(result.recommended_memory_mb, 4096);
        assert_eq!(result.adjustment_type, AdjustmentType::LargeUpsize);
        assert_eq!(result.estimated_saving, "no saving (requires upsizing)");
    }

    #[test]
    fn test_adjustment_margins() {
        let cfg = RightSizeConfig::default();
        assert_eq!(AdjustmentType::classify(0.3, &cfg), AdjustmentType::LargeDownsize);
        assert_eq!(AdjustmentType::classify(0.6, &cfg), AdjustmentType::SmallDownsize);
        assert_eq!(AdjustmentType::classify(1.0, &cfg), AdjustmentType::Keep);
        assert_eq!(AdjustmentType::classify(1.4, &cfg), AdjustmentType::SmallUpsize);
        assert_eq!(AdjustmentType::classify(1.8, &cfg), AdjustmentType::LargeUpsize);
    }

    #[test]
    fn test_risk_takes_worse_axis() {
        let advisor = RightSizeAdvisor::new(&RightSizeConfig::default());
        // cpu std 1.0 on 4 cores = 25% -> medium; memory is flat
        let cpu = series(&[1.0, 3.0, 1.0, 3.0]);
        let result = advisor.recommend(&vm(4, 8192), &cpu, &series(&[2000.0; 4]));
        assert_eq!(result.risk_level, RiskLevel::Medium);

        // cpu std 2.0 on 4 cores = 50% -> high
        let cpu = series(&[0.0, 4.0, 0.0, 4.0]);
        let result = advisor.recommend(&vm(4, 8192), &cpu, &series(&[2000.0; 4]));
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_confidence_tracks_sample_coverage() {
        assert_eq!(sample_confidence(288 * 7, 288 * 7, 7), 100.0);
        assert!((sample_confidence(288, 288, 2) - 50.0).abs() < 1e-9);
        assert_eq!(sample_confidence(10_000, 10_000, 1), 100.0);
    }

    #[test]
    fn test_zero_capacity_vm_is_neutral() {
        assert_eq!(capacity_ratio(4, 0), 1.0);
        assert_eq!(volatility_percent(&[1.0, 5.0], 0), 0.0);
        assert_eq!(estimate_saving(0, 2, 0, 512), "no saving (requires upsizing)");
    }
}
