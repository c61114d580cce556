//! # Status Reporting
//!
//! Operational view of an orchestrator's load, derived on demand from the
//! live registry, plus the fire-and-forget sink that status bars and
//! telemetry listen on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use super::pipeline::PipelineStatus;
use crate::config::AgentProfile;
use crate::state::RequestRegistry;

/// Whether the agent is currently working on anything
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentActivity {
    Active,
    Inactive,
}

impl fmt::Display for AgentActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        })
    }
}

/// Receives agent activity changes. Implementations must not block.
pub trait StatusSink: Send + Sync {
    fn update_agent_status(&self, agent_key: &str, display_name: &str, activity: AgentActivity);
}

/// Logs status changes
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn update_agent_status(&self, agent_key: &str, display_name: &str, activity: AgentActivity) {
        tracing::info!(agent = %agent_key, "{} is {}", display_name, activity);
    }
}

/// A status change as seen by channel subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub agent_key: String,
    pub display_name: String,
    pub activity: AgentActivity,
    pub at: DateTime<Utc>,
}

/// Broadcasts status changes to any number of subscribers
#[derive(Clone)]
pub struct ChannelStatusSink {
    tx: broadcast::Sender<StatusUpdate>,
}

impl ChannelStatusSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }
}

impl StatusSink for ChannelStatusSink {
    fn update_agent_status(&self, agent_key: &str, display_name: &str, activity: AgentActivity) {
        // No subscribers is fine
        let _ = self.tx.send(StatusUpdate {
            agent_key: agent_key.to_string(),
            display_name: display_name.to_string(),
            activity,
            at: Utc::now(),
        });
    }
}

/// Counts for one stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StageCounts {
    /// Stored results of this stage
    pub live: usize,
    /// Requests currently running this stage
    pub in_flight: usize,
}

/// Point-in-time view of an orchestrator. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusSnapshot {
    pub agent_key: String,
    pub display_name: String,
    pub is_active: bool,
    pub conceptualizations: StageCounts,
    pub generations: StageCounts,
    pub deployments: StageCounts,
    pub failed: usize,
    pub total_requests: usize,
    pub last_activity: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

impl AgentStatusSnapshot {
    /// Equal in everything but `generated_at`
    pub fn same_counts(&self, other: &Self) -> bool {
        self.is_active == other.is_active
            && self.conceptualizations == other.conceptualizations
            && self.generations == other.generations
            && self.deployments == other.deployments
            && self.failed == other.failed
            && self.total_requests == other.total_requests
            && self.last_activity == other.last_activity
    }

    pub fn activity(&self) -> AgentActivity {
        if self.is_active {
            AgentActivity::Active
        } else {
            AgentActivity::Inactive
        }
    }
}

pub struct StatusReporter {
    profile: AgentProfile,
    registry: Arc<RequestRegistry>,
    sink: Arc<dyn StatusSink>,
    last_published: Mutex<Option<AgentActivity>>,
}

impl StatusReporter {
    pub fn new(profile: AgentProfile, registry: Arc<RequestRegistry>, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            profile,
            registry,
            sink,
            last_published: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> AgentStatusSnapshot {
        let mut conceptualizations = StageCounts::default();
        let mut generations = StageCounts::default();
        let mut deployments = StageCounts::default();
        let mut failed = 0;

        let states = self.registry.states();
        for state in &states {
            conceptualizations.live += state.conceptualization.is_some() as usize;
            generations.live += state.generation.is_some() as usize;
            deployments.live += state.deployment.is_some() as usize;
            match state.status {
                PipelineStatus::Conceptualizing => conceptualizations.in_flight += 1,
                PipelineStatus::Generating => generations.in_flight += 1,
                PipelineStatus::Deploying => deployments.in_flight += 1,
                PipelineStatus::Failed => failed += 1,
                _ => {}
            }
        }

        AgentStatusSnapshot {
            agent_key: self.profile.key.clone(),
            display_name: self.profile.display_name.clone(),
            is_active: conceptualizations.in_flight + generations.in_flight + deployments.in_flight
                > 0,
            conceptualizations,
            generations,
            deployments,
            failed,
            total_requests: states.len(),
            last_activity: self.registry.last_activity(),
            generated_at: Utc::now(),
        }
    }

    /// Take a snapshot and tell the sink if the activity flag changed.
    ///
    /// Returns the new activity when the sink was notified.
    pub fn publish(&self) -> Option<AgentActivity> {
        let activity = self.snapshot().activity();
        {
            let mut last = self
                .last_published
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *last == Some(activity) {
                return None;
            }
            *last = Some(activity);
        }
        self.sink
            .update_agent_status(&self.profile.key, &self.profile.display_name, activity);
        Some(activity)
    }
}
