//! # Pipeline Events
//!
//! Progress events emitted by the orchestrator as stages run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pipeline::Stage;

/// Kind of pipeline event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    /// Request accepted and registered
    RequestAccepted,
    /// Stage started working
    StageStarted,
    /// Stage completed successfully
    StageCompleted,
    /// Stage failed; the request is now failed
    StageFailed,
    /// Deployment refused before any side effects
    DeploymentRejected,
    /// Research attached to the stage context
    ResearchCompleted,
    /// Research failed or timed out; the stage continues without it
    ResearchFailed,
    ResearchSkipped,
    /// Agent activity flipped between active and inactive
    StatusChanged,
}

/// An event in the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: PipelineEventKind,
    /// Agent profile key that produced this event
    pub agent: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    pub fn new(kind: PipelineEventKind, agent: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            agent: agent.to_string(),
            request_id: None,
            stage: None,
            data: None,
        }
    }

    pub fn for_request(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }

    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
