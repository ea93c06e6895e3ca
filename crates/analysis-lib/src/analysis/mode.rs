//! Analysis mode presets and custom overrides
//!
//! `safe`, `saving` and `aggressive` are fixed bundles of all four analyzer
//! configurations, ordered from conservative to aggressive. `custom` starts
//! empty and takes caller-supplied groups. Unknown mode names resolve to
//! `safe` rather than failing.

use super::{HealthConfig, RightSizeConfig, TidalConfig, ZombieVmConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Safe,
    Saving,
    Aggressive,
    Custom,
}

/// Display name and description of a mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeInfo {
    pub name: &'static str,
    pub description: &'static str,
}

impl AnalysisMode {
    /// Parse a mode name, falling back to `Safe` for anything unrecognised
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "safe" => AnalysisMode::Safe,
            "saving" => AnalysisMode::Saving,
            "aggressive" => AnalysisMode::Aggressive,
            "custom" => AnalysisMode::Custom,
            _ => AnalysisMode::Safe,
        }
    }

    pub fn all() -> [AnalysisMode; 4] {
        [
            AnalysisMode::Safe,
            AnalysisMode::Saving,
            AnalysisMode::Aggressive,
            AnalysisMode::Custom,
        ]
    }

    /// Same normalization as `parse`
    pub fn is_valid(name: &str) -> bool {
        let name = name.trim().to_ascii_lowercase();
        Self::all().iter().any(|m| m.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Safe => "safe",
            AnalysisMode::Saving => "saving",
            AnalysisMode::Aggressive => "aggressive",
            AnalysisMode::Custom => "custom",
        }
    }

    /// Preset bundle for this mode; `Custom` is empty
    pub fn preset(&self) -> AnalysisConfig {
        match self {
            AnalysisMode::Safe => safe_preset(),
            AnalysisMode::Saving => saving_preset(),
            AnalysisMode::Aggressive => aggressive_preset(),
            AnalysisMode::Custom => AnalysisConfig::default(),
        }
    }

    pub fn info(&self) -> ModeInfo {
        match self {
            AnalysisMode::Safe => ModeInfo {
                name: "Safe",
                description: "Conservative detection for production estates: \
                              long windows (30 days), low thresholds (5% CPU) \
                              and high confidence (80%).",
            },
            AnalysisMode::Saving => ModeInfo {
                name: "Saving",
                description: "Balances risk against cost for most estates: \
                              medium windows (14 days) and medium thresholds.",
            },
            AnalysisMode::Aggressive => ModeInfo {
                name: "Aggressive",
                description: "Maximizes utilization: short windows (7 days), \
                              high thresholds (15% CPU) and low confidence (50%) \
                              to surface more opportunities.",
            },
            AnalysisMode::Custom => ModeInfo {
                name: "Custom",
                description: "Caller-tuned thresholds and analysis windows per analyzer.",
            },
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One optional configuration group per analyzer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(rename = "zombieVM", default, skip_serializing_if = "Option::is_none")]
    pub zombie_vm: Option<ZombieVmConfig>,
    #[serde(rename = "rightSize", default, skip_serializing_if = "Option::is_none")]
    pub right_size: Option<RightSizeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tidal: Option<TidalConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthConfig>,
}

impl AnalysisConfig {
    /// Replace whole groups of `self` with the groups present in `overrides`
    ///
    /// Fields inside a group are never merged individually.
    pub fn merge(&self, overrides: &AnalysisConfig) -> AnalysisConfig {
        AnalysisConfig {
            zombie_vm: overrides.zombie_vm.clone().or_else(|| self.zombie_vm.clone()),
            right_size: overrides.right_size.clone().or_else(|| self.right_size.clone()),
            tidal: overrides.tidal.clone().or_else(|| self.tidal.clone()),
            health: overrides.health.clone().or_else(|| self.health.clone()),
        }
    }
}

/// Preset bundle for a mode name; unknown names give the `safe` bundle
pub fn resolve_mode(name: &str) -> AnalysisConfig {
    AnalysisMode::parse(name).preset()
}

/// Preset bundle, with custom groups applied when the mode is `custom`
pub fn effective_config(mode: AnalysisMode, custom: Option<&AnalysisConfig>) -> AnalysisConfig {
    let base = mode.preset();
    match (mode, custom) {
        (AnalysisMode::Custom, Some(overrides)) => base.merge(overrides),
        _ => base,
    }
}

fn safe_preset() -> AnalysisConfig {
    AnalysisConfig {
        zombie_vm: Some(ZombieVmConfig {
            analysis_days: 30,
            cpu_threshold: 5.0,
            memory_threshold: 10.0,
            io_threshold: 10.0,
            network_threshold: 10.0,
            min_confidence: 80.0,
        }),
        right_size: Some(RightSizeConfig {
            analysis_days: 7,
            buffer_ratio: 1.3,
            p95_threshold: 95.0,
            small_margin: 0.4,
            large_margin: 0.6,
        }),
        tidal: Some(TidalConfig {
            analysis_days: 30,
            min_stability: 70.0,
            min_variation: 40.0,
            ..TidalConfig::default()
        }),
        health: Some(HealthConfig {
            resource_balance_weight: 0.4,
            overcommit_risk_weight: 0.3,
            hotspot_weight: 0.3,
        }),
    }
}

fn saving_preset() -> AnalysisConfig {
    AnalysisConfig {
        zombie_vm: Some(ZombieVmConfig {
            analysis_days: 14,
            cpu_threshold: 10.0,
            memory_threshold: 20.0,
            io_threshold: 20.0,
            network_threshold: 20.0,
            min_confidence: 60.0,
        }),
        right_size: Some(RightSizeConfig {
            analysis_days: 7,
            buffer_ratio: 1.2,
            p95_threshold: 90.0,
            small_margin: 0.3,
            large_margin: 0.5,
        }),
        tidal: Some(TidalConfig {
            analysis_days: 21,
            min_stability: 60.0,
            min_variation: 30.0,
            ..TidalConfig::default()
        }),
        health: Some(HealthConfig {
            resource_balance_weight: 0.4,
            overcommit_risk_weight: 0.3,
            hotspot_weight: 0.3,
        }),
    }
}

fn aggressive_preset() -> AnalysisConfig {
    AnalysisConfig {
        zombie_vm: Some(ZombieVmConfig {
            analysis_days: 7,
            cpu_threshold: 15.0,
            memory_threshold: 30.0,
            io_threshold: 30.0,
            network_threshold: 30.0,
            min_confidence: 50.0,
        }),
        right_size: Some(RightSizeConfig {
            analysis_days: 5,
            buffer_ratio: 1.1,
            p95_threshold: 85.0,
            small_margin: 0.2,
            large_margin: 0.4,
        }),
        tidal: Some(TidalConfig {
            analysis_days: 14,
            min_stability: 50.0,
            min_variation: 20.0,
            ..TidalConfig::default()
        }),
        health: Some(HealthConfig {
            resource_balance_weight: 0.3,
            overcommit_risk_weight: 0.3,
            hotspot_weight: 0.4,
        }),
    }
}
