//! Analysis engine
//!
//! Four stateless analyzers share one engine that pulls inventory and
//! metric series from the external sources:
//! - Zombie detector (sustained idle VMs)
//! - Right-size advisor (percentile-based vCPU/memory recommendation)
//! - Tidal detector (daily/weekly load cycles)
//! - Health scorer (balance, overcommit and hotspot concentration)
//!
//! A per-VM fetch failure or empty required series skips that VM; an
//! inventory failure aborts the whole call.

mod health;
mod mode;
mod rightsize;
pub mod stats;
mod tidal;
mod zombie;


pub use health::{
    overcommit_score, HealthConfig, HealthLevel, HealthScoreResult, HealthScorer,
    CAPACITY_VMS_PER_HOST, SMALL_VM_AUDIT_THRESHOLD,
};
pub use mode::{effective_config, resolve_mode, AnalysisConfig, AnalysisMode, ModeInfo};
pub use rightsize::{
    normalize_cpu, normalize_memory, AdjustmentType, RightSizeAdvisor, RightSizeConfig,
    RightSizeResult, RiskLevel, CPU_LADDER, SAMPLES_PER_DAY,
};
pub use tidal::{
    EmptyBucketPolicy, TidalConfig, TidalDetector, TidalPattern, TidalResult, WEEKDAY_NAMES,
};
pub use zombie::{zombie_confidence, ZombieDetector, ZombieVmConfig, ZombieVmResult};

use crate::error::{AnalysisError, UnknownAnalysisKind};
use crate::findings::{Finding, IntoFinding};
use crate::models::{MetricSample, VmSnapshot};
use crate::observability::{AnalyzerMetrics, StructuredLogger};
use crate::source::{InventorySource, MetricQuery, MetricSource};
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Analysis kinds a caller can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Zombie,
    RightSize,
    Tidal,
    Health,
}

impl AnalysisKind {
    pub fn all() -> [AnalysisKind; 4] {
        [
            AnalysisKind::Zombie,
            AnalysisKind::RightSize,
            AnalysisKind::Tidal,
            AnalysisKind::Health,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Zombie => "zombie",
            AnalysisKind::RightSize => "rightsize",
            AnalysisKind::Tidal => "tidal",
            AnalysisKind::Health => "health",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = UnknownAnalysisKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zombie" => Ok(AnalysisKind::Zombie),
            "rightsize" | "right_size" => Ok(AnalysisKind::RightSize),
            "tidal" => Ok(AnalysisKind::Tidal),
            "health" => Ok(AnalysisKind::Health),
            other => Err(UnknownAnalysisKind(other.to_string())),
        }
    }
}

/// Per-call evaluation context
///
/// `now` bounds the metric window, `timezone` drives calendar-day, hour and
/// weekday bucketing. Cancellation is polled between VM iterations.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub now: DateTime<Utc>,
    pub timezone: FixedOffset,
    cancel: Option<watch::Receiver<bool>>,
}

impl Default for AnalysisContext {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

impl AnalysisContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            timezone: Utc.fix(),
            cancel: None,
        }
    }

    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;
        self
    }

    /// Abort between VMs once the sender publishes `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// `[now - days, now]`, clamped to the earliest representable instant
    pub fn window(&self, days: i32) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self
            .now
            .checked_sub_signed(Duration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        (start, self.now)
    }

    pub(crate) fn local(&self, timestamp: DateTime<Utc>) -> DateTime<FixedOffset> {
        timestamp.with_timezone(&self.timezone)
    }
}

/// What to analyze and with which mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub connection_id: u64,
    #[serde(default)]
    pub task_id: Option<u64>,
    pub kinds: Vec<AnalysisKind>,
    /// Unknown names resolve to `safe`
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub custom: Option<AnalysisConfig>,
}

impl AnalysisRequest {
    pub fn new(connection_id: u64, kinds: impl Into<Vec<AnalysisKind>>) -> Self {
        Self {
            connection_id,
            task_id: None,
            kinds: kinds.into(),
            mode: AnalysisMode::Safe.as_str().to_string(),
            custom: None,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_custom(mut self, custom: AnalysisConfig) -> Self {
        self.custom = Some(custom);
        self
    }

    pub fn with_task(mut self, task_id: u64) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

/// Results of one `run`, one slot per requested kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub connection_id: u64,
    pub mode: AnalysisMode,
    pub config: AnalysisConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zombie: Option<Vec<ZombieVmResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_size: Option<Vec<RightSizeResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tidal: Option<Vec<TidalResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthScoreResult>,
}

impl AnalysisOutcome {
    /// Normalize every typed result into a finding
    pub fn findings(
        &self,
        task_id: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Vec<Finding>, AnalysisError> {
        let mut findings = Vec::new();
        for result in self.zombie.iter().flatten() {
            findings.push(result.to_finding(task_id, created_at)?);
        }
        for result in self.right_size.iter().flatten() {
            findings.push(result.to_finding(task_id, created_at)?);
        }
        for result in self.tidal.iter().flatten() {
            findings.push(result.to_finding(task_id, created_at)?);
        }
        if let Some(health) = &self.health {
            findings.push(health.to_finding(task_id, created_at)?);
        }
        Ok(findings)
    }
}

/// Engine shared by all analyzers
pub struct AnalysisEngine {
    inventory: Arc<dyn InventorySource>,
    metrics: Arc<dyn MetricSource>,
    telemetry: AnalyzerMetrics,
    logger: StructuredLogger,
}

impl AnalysisEngine {
    pub fn new(inventory: Arc<dyn InventorySource>, metrics: Arc<dyn MetricSource>) -> Self {
        Self {
            inventory,
            metrics,
            telemetry: AnalyzerMetrics::new(),
            logger: StructuredLogger::new("analysis-engine"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Resolve the mode and run every requested kind
    pub async fn run(
        &self,
        ctx: &AnalysisContext,
        request: &AnalysisRequest,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let mode = AnalysisMode::parse(&request.mode);
        let config = effective_config(mode, request.custom.as_ref());

        let mut outcome = AnalysisOutcome {
            connection_id: request.connection_id,
            mode,
            config: config.clone(),
            zombie: None,
            right_size: None,
            tidal: None,
            health: None,
        };

        for kind in &request.kinds {
            match kind {
                AnalysisKind::Zombie => {
                    let cfg = config.zombie_vm.clone().unwrap_or_default();
                    outcome.zombie =
                        Some(self.detect_zombie_vms(ctx, request.connection_id, &cfg).await?);
                }
                AnalysisKind::RightSize => {
                    let cfg = config.right_size.clone().unwrap_or_default();
                    outcome.right_size = Some(
                        self.analyze_right_size(ctx, request.connection_id, request.task_id, &cfg)
                            .await?,
                    );
                }
                AnalysisKind::Tidal => {
                    let cfg = config.tidal.clone().unwrap_or_default();
                    outcome.tidal =
                        Some(self.detect_tidal_patterns(ctx, request.connection_id, &cfg).await?);
                }
                AnalysisKind::Health => {
                    let cfg = config.health.clone().unwrap_or_default();
                    outcome.health =
                        Some(self.analyze_health_score(ctx, request.connection_id, &cfg).await?);
                }
            }
        }

        Ok(outcome)
    }

    /// Powered-on VMs of a connection; lookup failure aborts the analysis
    async fn powered_on_vms(
        &self,
        kind: AnalysisKind,
        connection_id: u64,
    ) -> Result<Vec<VmSnapshot>, AnalysisError> {
        let vms = self
            .inventory
            .list_vms(connection_id)
            .await
            .map_err(|e| self.fail(kind, connection_id, AnalysisError::inventory("list VMs", e)))?;
        Ok(vms.into_iter().filter(VmSnapshot::is_powered_on).collect())
    }

    /// Required series: `None` when the fetch fails or comes back empty
    async fn required_series(
        &self,
        kind: AnalysisKind,
        vm: &VmSnapshot,
        query: MetricQuery,
    ) -> Option<Vec<MetricSample>> {
        match self.metrics.list_metrics(&query).await {
            Ok(samples) if !samples.is_empty() => Some(samples),
            Ok(_) => {
                self.skip(kind, vm, &format!("no {} samples", query.metric_type));
                None
            }
            Err(e) => {
                self.skip(kind, vm, &format!("{} fetch failed: {:#}", query.metric_type, e));
                None
            }
        }
    }

    /// Best-effort series: failures read as an empty series
    async fn optional_series(&self, query: MetricQuery) -> Vec<MetricSample> {
        self.metrics.list_metrics(&query).await.unwrap_or_default()
    }

    fn check_cancelled(
        &self,
        ctx: &AnalysisContext,
        kind: AnalysisKind,
        connection_id: u64,
        processed: usize,
        total: usize,
    ) -> Result<(), AnalysisError> {
        if !ctx.is_cancelled() {
            return Ok(());
        }
        self.logger
            .log_analysis_cancelled(kind.as_str(), connection_id, processed, total);
        self.telemetry.inc_analysis_failures(kind.as_str());
        Err(AnalysisError::Cancelled { processed, total })
    }

    fn skip(&self, kind: AnalysisKind, vm: &VmSnapshot, reason: &str) {
        self.telemetry.inc_vms_skipped(kind.as_str());
        self.logger.log_vm_skipped(kind.as_str(), &vm.name, reason);
    }

    fn fail(&self, kind: AnalysisKind, connection_id: u64, error: AnalysisError) -> AnalysisError {
        self.telemetry.inc_analysis_failures(kind.as_str());
        self.logger
            .log_analysis_failed(kind.as_str(), connection_id, &error.to_string());
        error
    }

    fn finish(
        &self,
        kind: AnalysisKind,
        connection_id: u64,
        started: Instant,
        results: usize,
        skipped: usize,
    ) {
        let elapsed = started.elapsed();
        self.telemetry
            .observe_analysis_latency(kind.as_str(), elapsed.as_secs_f64());
        self.telemetry.add_results_emitted(kind.as_str(), results);
        self.logger.log_analysis_completed(
            kind.as_str(),
            connection_id,
            results,
            skipped,
            elapsed.as_millis(),
        );
    }
}
