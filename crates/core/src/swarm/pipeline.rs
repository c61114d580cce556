//! # Pipeline Stages
//!
//! Defines the stages of the creation pipeline and the lifecycle a request
//! moves through.
//!
//! ```text
//! Created → Conceptualizing → Conceptualized → Generating → Generated → Deploying → Deployed
//!                 └──────────────────┴─────────────┴──────────────┴─────────→ Failed
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// One discrete phase of the creation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Turn requirements into a concept
    Conceptualize,
    /// Produce the agent artifact from a concept
    Generate,
    /// Check an artifact (after generation, and after deployment)
    Validate,
    /// Materialize an artifact into an environment
    Deploy,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conceptualize => "conceptualize",
            Self::Generate => "generate",
            Self::Validate => "validate",
            Self::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of one creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Accepted, nothing has run yet
    #[default]
    Created,
    Conceptualizing,
    Conceptualized,
    /// Generation and its validation sub-step are running
    Generating,
    Generated,
    Deploying,
    Deployed,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Conceptualizing => "conceptualizing",
            Self::Conceptualized => "conceptualized",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
        }
    }

    /// The in-flight status entered when `stage` starts from this status.
    ///
    /// `None` means the stage may not start here. Validate never starts on
    /// its own; it runs inside Generate and Deploy.
    pub fn begin(&self, stage: Stage) -> Option<PipelineStatus> {
        match (self, stage) {
            (Self::Created, Stage::Conceptualize) => Some(Self::Conceptualizing),
            (Self::Conceptualized, Stage::Generate) => Some(Self::Generating),
            (Self::Generated, Stage::Deploy) => Some(Self::Deploying),
            _ => None,
        }
    }

    /// Advance an in-flight status to its completed status
    pub fn advance(&self) -> PipelineStatus {
        match self {
            Self::Conceptualizing => Self::Conceptualized,
            Self::Generating => Self::Generated,
            Self::Deploying => Self::Deployed,
            other => *other,
        }
    }

    /// The stage currently running, if any
    pub fn in_flight_stage(&self) -> Option<Stage> {
        match self {
            Self::Conceptualizing => Some(Stage::Conceptualize),
            Self::Generating => Some(Stage::Generate),
            Self::Deploying => Some(Stage::Deploy),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight_stage().is_some()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deployed | Self::Failed)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
