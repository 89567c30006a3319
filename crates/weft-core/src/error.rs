// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use weft_model::ProviderError;
use weft_patch::PatchError;
use weft_plan::PlanError;

/// The closed error taxonomy of the orchestration core.
///
/// `PATCH_CONFLICT` has no variant here on purpose: conflicts are recorded
/// in the merge outcome and never thrown.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("plan rejected: {source}")]
    Validation { source: PlanError },
    #[error("dependency cycle: {cycle_task_ids:?}")]
    DependencyCycle { cycle_task_ids: Vec<String> },
    #[error("task {task_id} timed out after {timeout_ms}ms")]
    TaskTimeout { task_id: String, timeout_ms: u64 },
    #[error("task {task_id} cancelled")]
    TaskCancelled { task_id: String },
    #[error("retryable provider failure: {source}")]
    ProviderRetryable { source: ProviderError },
    #[error("fatal provider failure: {source}")]
    ProviderFatal { source: ProviderError },
    #[error("patch application failed: {source}")]
    PatchApplyFailed { source: PatchError },
    #[error("graph version mismatch: envelope base {base} vs graph {version}")]
    VersionMismatch { base: u64, version: u64 },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    /// Stable error-kind name for logs and external consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::DependencyCycle { .. } => "DEPENDENCY_CYCLE",
            Self::TaskTimeout { .. } => "TASK_TIMEOUT",
            Self::TaskCancelled { .. } => "TASK_CANCELLED",
            Self::ProviderRetryable { .. } => "PROVIDER_RETRYABLE",
            Self::ProviderFatal { .. } => "PROVIDER_FATAL",
            Self::PatchApplyFailed { .. } => "PATCH_APPLY_FAILED",
            Self::VersionMismatch { .. } => "VERSION_MISMATCH",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

impl From<PlanError> for CoreError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::Cycle { cycle_task_ids } => Self::DependencyCycle { cycle_task_ids },
            other => Self::Validation { source: other },
        }
    }
}

impl From<ProviderError> for CoreError {
    fn from(e: ProviderError) -> Self {
        if e.retryable {
            Self::ProviderRetryable { source: e }
        } else {
            Self::ProviderFatal { source: e }
        }
    }
}

impl From<PatchError> for CoreError {
    fn from(e: PatchError) -> Self {
        match e {
            PatchError::VersionMismatch { base, version } => Self::VersionMismatch { base, version },
            other => Self::PatchApplyFailed { source: other },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
