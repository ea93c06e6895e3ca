//! Analysis library for virtualization cost and efficiency recommendations
//!
//! This crate provides the core functionality for:
//! - Zombie (idle) VM detection
//! - Compute/memory right-sizing
//! - Daily and weekly tidal load-pattern detection
//! - Platform health scoring
//! - Analysis mode presets and custom overrides
//! - Finding shaping for downstream persistence

pub mod analysis;
pub mod error;
pub mod findings;
pub mod models;
pub mod observability;
pub mod source;

pub use analysis::{
    AnalysisConfig, AnalysisContext, AnalysisEngine, AnalysisKind, AnalysisMode,
    AnalysisOutcome, AnalysisRequest,
};
pub use error::AnalysisError;
pub use findings::{persist_findings, Finding, Severity};
pub use models::*;
pub use observability::{AnalyzerMetrics, StructuredLogger};
pub use source::{FindingSink, InventorySnapshot, InventorySource, MemoryStore, MetricSource};
