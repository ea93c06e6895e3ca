//! Error types surfaced by analysis calls

use thiserror::Error;

/// Errors returned by the analysis engine
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Inventory or connection lookup failed; no partial result is meaningful
    #[error("analysis failed: {what}: {source}")]
    Inventory {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("analysis cancelled after {processed} of {total} VMs")]
    Cancelled { processed: usize, total: usize },

    #[error("failed to serialize finding details: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to persist findings: {0}")]
    Sink(#[source] anyhow::Error),
}

/// Analysis kind name that matches none of the known analyzers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown analysis kind: {0}")]
pub struct UnknownAnalysisKind(pub String);

impl AnalysisError {
    pub(crate) fn inventory(what: &'static str, source: anyhow::Error) -> Self {
        AnalysisError::Inventory { what, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnalysisError::Cancelled { .. })
    }
}
