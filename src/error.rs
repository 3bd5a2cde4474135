//! Run-level error taxonomy.
//!
//! Per-item failures (`SourceUnavailable`, `AnalysisFailure`,
//! `VerificationFailure`, `DistributionPartialFailure`) are logged and counted;
//! only `StoreUnavailable` aborts a run.

use thiserror::Error;

use crate::item::Identity;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source '{source_name}' unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("analysis failed for {identity} after {attempts} attempt(s): {reason}")]
    AnalysisFailure {
        identity: Identity,
        attempts: u32,
        reason: String,
    },

    #[error("verification failed for {identity}: {reason}")]
    VerificationFailure { identity: Identity, reason: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("distribution partially failed: {delivered} delivered, {failed} failed")]
    DistributionPartialFailure { delivered: usize, failed: usize },

    #[error("a pipeline run is already in progress")]
    RunInProgress,
}
