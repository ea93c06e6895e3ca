//! Runner configuration

use analysis_lib::{AnalysisConfig, AnalysisKind};
use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "vm-analyzer";
const ENV_PREFIX: &str = "ANALYZER";

/// Runner configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// JSON inventory/metric snapshot to analyze
    pub snapshot_path: PathBuf,

    #[serde(default = "default_connection_id")]
    pub connection_id: u64,

    /// Collection run that scopes right-size metrics and tags findings
    #[serde(default)]
    pub task_id: Option<u64>,

    /// safe | saving | aggressive | custom
    #[serde(default = "default_mode")]
    pub mode: String,

    /// JSON `AnalysisConfig` applied in custom mode
    #[serde(default)]
    pub custom_config_path: Option<PathBuf>,

    /// Comma-separated analysis kinds
    #[serde(default = "default_kinds")]
    pub kinds: String,

    /// JSON-lines file receiving findings
    #[serde(default)]
    pub findings_output: Option<PathBuf>,

    /// Prometheus text dump written after the run
    #[serde(default)]
    pub metrics_output: Option<PathBuf>,

    /// Offset from UTC for day, hour and weekday bucketing
    #[serde(default)]
    pub utc_offset_hours: i32,
}

fn default_connection_id() -> u64 {
    1
}

fn default_mode() -> String {
    "safe".to_string()
}

fn default_kinds() -> String {
    "zombie,rightsize,tidal,health".to_string()
}

impl AgentConfig {
    /// Load configuration from `vm-analyzer.toml` (optional) and `ANALYZER_*`
    /// environment variables
    pub fn load() -> Result<Self> {
        Self::from_sources(None)
    }

    pub fn from_sources(file: Option<&Path>) -> Result<Self> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(CONFIG_FILE).required(false),
        };

        let config = config::Config::builder()
            .add_source(file_source)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        config
            .try_deserialize()
            .context("Invalid analyzer configuration")
    }

    pub fn kinds(&self) -> Result<Vec<AnalysisKind>> {
        let kinds = self
            .kinds
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| k.parse::<AnalysisKind>())
            .collect::<Result<Vec<_>, _>>()?;

        if kinds.is_empty() {
            return Err(anyhow!("no analysis kinds configured"));
        }
        Ok(kinds)
    }

    pub fn timezone(&self) -> Result<FixedOffset> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| anyhow!("UTC offset out of range: {}h", self.utc_offset_hours))
    }

    pub fn load_custom(&self) -> Result<Option<AnalysisConfig>> {
        let Some(path) = &self.custom_config_path else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read custom config {}", path.display()))?;
        let custom = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse custom config {}", path.display()))?;
        Ok(Some(custom))
    }
}
