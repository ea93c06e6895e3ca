//! Tidal (periodic) load pattern detection
//!
//! CPU samples are bucketed by local hour-of-day and by weekday. A high
//! coefficient of variation across the bucket means marks a repeating cycle
//! whose quiet hours or days are candidates for scheduled power-off.

use super::{stats, AnalysisContext, AnalysisEngine, AnalysisKind};
use crate::error::AnalysisError;
use crate::models::{MetricSample, MetricType, VmIdentity, VmSnapshot};
use crate::source::MetricQuery;
use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Weekday names indexed by `num_days_from_sunday`
pub const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const DAILY_CV_SCALE: f64 = 2.0;
const WEEKLY_CV_SCALE: f64 = 2.5;

/// How hours/weekdays without samples enter the variation measure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyBucketPolicy {
    /// Empty buckets count as a mean of 0
    #[default]
    ZeroFill,
    /// Only populated buckets are measured
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TidalConfig {
    pub analysis_days: i32,
    /// Minimum stability score (0-100) for a pattern to be reported
    pub min_stability: f64,
    /// Accepted for compatibility with stored configurations; not used in
    /// classification
    pub min_variation: f64,
    pub empty_buckets: EmptyBucketPolicy,
}

impl Default for TidalConfig {
    fn default() -> Self {
        Self {
            analysis_days: 30,
            min_stability: 60.0,
            min_variation: 30.0,
            empty_buckets: EmptyBucketPolicy::ZeroFill,
        }
    }
}

impl TidalConfig {
    pub fn validated(&self) -> Self {
        if self.analysis_days <= 0 {
            Self::default()
        } else {
            self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TidalPattern {
    Daily,
    Weekly,
}

impl TidalPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            TidalPattern::Daily => "daily",
            TidalPattern::Weekly => "weekly",
        }
    }
}

impl fmt::Display for TidalPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TidalResult {
    #[serde(flatten)]
    pub vm: VmIdentity,
    pub pattern: TidalPattern,
    /// 0-100
    pub stability_score: f64,
    /// Local hours 0-23, busiest first
    pub peak_hours: Vec<u32>,
    /// Weekdays 0-6 (0 = Sunday), busiest first
    pub peak_days: Vec<u32>,
    /// Quietest first
    pub trough_hours: Vec<u32>,
    pub trough_days: Vec<u32>,
    pub recommendation: String,
    pub estimated_saving: String,
}

/// Running sum per bucket
struct Buckets<const N: usize> {
    sums: [f64; N],
    counts: [u32; N],
}

impl<const N: usize> Buckets<N> {
    fn collect(samples: &[MetricSample], index: impl Fn(&MetricSample) -> usize) -> Self {
        let mut buckets = Self {
            sums: [0.0; N],
            counts: [0; N],
        };
        for sample in samples {
            let i = index(sample);
            buckets.sums[i] += sample.value;
            buckets.counts[i] += 1;
        }
        buckets
    }

    /// `(bucket, mean)` for every bucket with at least one sample
    fn populated(&self) -> Vec<(u32, f64)> {
        (0..N)
            .filter(|&i| self.counts[i] > 0)
            .map(|i| (i as u32, self.sums[i] / f64::from(self.counts[i])))
            .collect()
    }

    fn means(&self, policy: EmptyBucketPolicy) -> Vec<f64> {
        match policy {
            EmptyBucketPolicy::ZeroFill => (0..N)
                .map(|i| {
                    if self.counts[i] > 0 {
                        self.sums[i] / f64::from(self.counts[i])
                    } else {
                        0.0
                    }
                })
                .collect(),
            EmptyBucketPolicy::Exclude => self.populated().into_iter().map(|(_, m)| m).collect(),
        }
    }

    /// CV (percent) of the bucket means times `scale`, capped at 100
    fn stability(&self, policy: EmptyBucketPolicy, scale: f64) -> f64 {
        let cv_percent = stats::coefficient_of_variation(&self.means(policy)) * 100.0;
        f64::min(100.0, cv_percent * scale)
    }

    /// Busiest `top` buckets and quietest `top` buckets (quietest first)
    fn peaks_and_troughs(&self, top: impl Fn(usize) -> usize) -> (Vec<u32>, Vec<u32>) {
        let mut ranked = self.populated();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let count = top(ranked.len()).min(ranked.len());
        let peaks = ranked.iter().take(count).map(|(b, _)| *b).collect();
        let troughs = ranked.iter().rev().take(count).map(|(b, _)| *b).collect();
        (peaks, troughs)
    }
}

pub struct TidalDetector {
    config: TidalConfig,
}

impl TidalDetector {
    pub fn new(config: &TidalConfig) -> Self {
        Self {
            config: config.validated(),
        }
    }

    pub fn config(&self) -> &TidalConfig {
        &self.config
    }

    /// Classify one VM's cpu series
    ///
    /// # Returns
    /// * `None` when neither cycle reaches `min_stability`
    pub fn detect(
        &self,
        ctx: &AnalysisContext,
        vm: &VmSnapshot,
        cpu: &[MetricSample],
    ) -> Option<TidalResult> {
        let hourly: Buckets<24> = Buckets::collect(cpu, |s| ctx.local(s.timestamp).hour() as usize);
        let weekly: Buckets<7> = Buckets::collect(cpu, |s| {
            ctx.local(s.timestamp).weekday().num_days_from_sunday() as usize
        });

        let policy = self.config.empty_buckets;
        let daily_stability = hourly.stability(policy, DAILY_CV_SCALE);
        let weekly_stability = weekly.stability(policy, WEEKLY_CV_SCALE);
        let min_stability = self.config.min_stability;

        let (pattern, stability_score) =
            if daily_stability > weekly_stability && daily_stability >= min_stability {
                (TidalPattern::Daily, daily_stability)
            } else if weekly_stability >= min_stability {
                (TidalPattern::Weekly, weekly_stability)
            } else {
                return None;
            };
        // A flat series has no cycle regardless of the threshold
        if stability_score <= 0.0 {
            return None;
        }

        let (peak_hours, trough_hours, peak_days, trough_days) = match pattern {
            TidalPattern::Daily => {
                let (peaks, troughs) = hourly.peaks_and_troughs(|n| (n / 4).max(1));
                (peaks, troughs, Vec::new(), Vec::new())
            }
            TidalPattern::Weekly => {
                let (peaks, troughs) = weekly.peaks_and_troughs(|_| 2);
                (Vec::new(), Vec::new(), peaks, troughs)
            }
        };

        let recommendation = recommendation(&vm.name, pattern, &trough_hours, &trough_days);
        Some(TidalResult {
            vm: VmIdentity::from(vm),
            pattern,
            stability_score,
            peak_hours,
            peak_days,
            trough_hours,
            trough_days,
            recommendation,
            estimated_saving: estimate_saving(stability_score).to_string(),
        })
    }
}

fn recommendation(
    vm_name: &str,
    pattern: TidalPattern,
    trough_hours: &[u32],
    trough_days: &[u32],
) -> String {
    match pattern {
        TidalPattern::Daily if !trough_hours.is_empty() => {
            let mut hours = trough_hours.to_vec();
            hours.sort_unstable();
            let hours: Vec<String> = hours.iter().map(|h| format!("{:02}:00", h)).collect();
            format!(
                "VM {} follows a clear daily cycle; \
                 consider powering it off during its trough hours ({})",
                vm_name,
                hours.join(", ")
            )
        }
        TidalPattern::Daily => format!(
            "VM {} follows a daily cycle; align its running hours with the load",
            vm_name
        ),
        TidalPattern::Weekly if !trough_days.is_empty() => {
            let days: Vec<&str> = trough_days
                .iter()
                .filter_map(|d| WEEKDAY_NAMES.get(*d as usize).copied())
                .collect();
            format!(
                "VM {} follows a clear weekly cycle; \
                 consider powering it off on its trough days ({})",
                vm_name,
                days.join(", ")
            )
        }
        TidalPattern::Weekly => format!(
            "VM {} follows a weekly cycle; schedule it differently for weekdays and weekends",
            vm_name
        ),
    }
}

fn estimate_saving(stability: f64) -> &'static str {
    if stability >= 80.0 {
        "50-70%"
    } else if stability >= 60.0 {
        "30-50%"
    } else {
        "10-30%"
    }
}

impl AnalysisEngine {
    /// Detect daily and weekly cycles for powered-on VMs of a connection
    pub async fn detect_tidal_patterns(
        &self,
        ctx: &AnalysisContext,
        connection_id: u64,
        config: &TidalConfig,
    ) -> Result<Vec<TidalResult>, AnalysisError> {
        let kind = AnalysisKind::Tidal;
        let started = Instant::now();
        let detector = TidalDetector::new(config);
        let (start, end) = ctx.window(detector.config().analysis_days);

        let vms = self.powered_on_vms(kind, connection_id).await?;
        self.logger
            .log_analysis_started(kind.as_str(), connection_id, vms.len());

        let mut results = Vec::new();
        let mut skipped = 0;
        for (processed, vm) in vms.iter().enumerate() {
            self.check_cancelled(ctx, kind, connection_id, processed, vms.len())?;
            self.telemetry.inc_vms_evaluated(kind.as_str());

            let query = MetricQuery::new(vm.id, MetricType::Cpu, start, end);
            let Some(cpu) = self.required_series(kind, vm, query).await else {
                skipped += 1;
                continue;
            };

            if let Some(result) = detector.detect(ctx, vm, &cpu) {
                results.push(result);
            }
        }

        self.finish(kind, connection_id, started, results.len(), skipped);
        Ok(results)
    }
}
