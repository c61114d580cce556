use std::time::Duration;

use thiserror::Error;

use crate::state::RecordKind;
use crate::swarm::pipeline::{PipelineStatus, Stage};

/// Errors surfaced to the caller of an orchestrator stage method.
///
/// All variants are fatal to the current request only. Research failures
/// never appear here; they are recorded on the stage result instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid requirements: field '{field}' {reason}")]
    InvalidRequirements { field: String, reason: String },

    #[error("No {kind} found with id '{id}'")]
    NotFound { kind: RecordKind, id: String },

    #[error("Pre-deployment validation failed for {generation_id}: {}", .issues.join("; "))]
    PreDeploymentValidation {
        generation_id: String,
        issues: Vec<String>,
    },

    #[error("{stage} stage failed for {request_id}: {message}")]
    StageExecution {
        stage: Stage,
        request_id: String,
        message: String,
    },

    #[error("{stage} stage timed out after {}ms for {request_id}", .timeout.as_millis())]
    StageTimeout {
        stage: Stage,
        request_id: String,
        timeout: Duration,
    },

    #[error("{stage} stage cancelled for {request_id}")]
    Cancelled { stage: Stage, request_id: String },

    #[error("Request {request_id} is {status}; cannot run the {stage} stage")]
    InvalidTransition {
        request_id: String,
        status: PipelineStatus,
        stage: Stage,
    },
}

impl PipelineError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRequirements {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(kind: RecordKind, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the error marks the request as `Failed` when it occurs
    /// after the stage has started.
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            Self::StageExecution { .. } | Self::StageTimeout { .. } | Self::Cancelled { .. }
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
