//! # Research Augmenter
//!
//! Consulted before each major stage. Builds a dated, domain-scoped query,
//! calls the research service under its own timeout, and hands back a
//! `ResearchRecord` that always describes what happened. A failing or slow
//! service never fails the stage; it is logged and recorded instead.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::service::{ResearchInsights, ResearchService};
use crate::state::CreationRequest;
use crate::swarm::pipeline::Stage;

/// How research failures are treated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPolicy {
    /// Query before each stage; failures and timeouts are recorded and ignored
    #[default]
    BestEffort,
    /// Never query
    Disabled,
}

/// What the research call produced
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResearchOutcome {
    Augmented { insights: ResearchInsights },
    Skipped { reason: String },
    Failed { error: String },
}

/// Research attached to a stage result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchRecord {
    pub query: String,
    pub topics: Vec<String>,
    #[serde(flatten)]
    pub outcome: ResearchOutcome,
    pub elapsed_ms: u64,
}

impl ResearchRecord {
    pub fn skipped(reason: &str) -> Self {
        Self {
            query: String::new(),
            topics: Vec::new(),
            outcome: ResearchOutcome::Skipped {
                reason: reason.to_string(),
            },
            elapsed_ms: 0,
        }
    }

    pub fn insights(&self) -> Option<&ResearchInsights> {
        match &self.outcome {
            ResearchOutcome::Augmented { insights } => Some(insights),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ResearchOutcome::Failed { .. })
    }
}

/// Best-effort research side channel
#[derive(Clone)]
pub struct ResearchAugmenter {
    /// `None` when no backend is configured
    service: Option<Arc<dyn ResearchService>>,
    policy: ResearchPolicy,
    timeout: Duration,
}

impl ResearchAugmenter {
    pub fn new(service: Arc<dyn ResearchService>, policy: ResearchPolicy, timeout: Duration) -> Self {
        Self {
            service: Some(service),
            policy,
            timeout,
        }
    }

    /// Research turned off by policy
    pub fn disabled() -> Self {
        Self {
            service: None,
            policy: ResearchPolicy::Disabled,
            timeout: Duration::ZERO,
        }
    }

    /// Best-effort policy, but nothing to query
    pub fn unconfigured() -> Self {
        Self {
            service: None,
            policy: ResearchPolicy::BestEffort,
            timeout: Duration::ZERO,
        }
    }

    pub fn policy(&self) -> ResearchPolicy {
        self.policy
    }

    /// Query string for a stage, embedding the date and domain
    pub fn build_query(stage: Stage, request: &CreationRequest, date: NaiveDate) -> String {
        format!(
            "{} research for {} agent '{}' (as of {})",
            stage,
            request.domain.trim(),
            request.name.trim(),
            date.format("%Y-%m-%d")
        )
    }

    /// Topic tags: domain, stage, then declared capabilities
    pub fn topics(stage: Stage, request: &CreationRequest) -> Vec<String> {
        let mut topics = vec![
            request.domain.trim().to_lowercase(),
            stage.as_str().to_string(),
            "agent".to_string(),
        ];
        for capability in &request.capabilities {
            let tag = capability.trim().to_lowercase();
            if !topics.contains(&tag) {
                topics.push(tag);
            }
        }
        topics
    }

    /// Run one research query for `stage`. Never fails.
    pub async fn augment(&self, stage: Stage, request: &CreationRequest) -> ResearchRecord {
        if self.policy == ResearchPolicy::Disabled {
            return ResearchRecord::skipped("research disabled by policy");
        }
        let Some(service) = &self.service else {
            return ResearchRecord::skipped("no research backend configured");
        };

        let query = Self::build_query(stage, request, Utc::now().date_naive());
        let topics = Self::topics(stage, request);
        let started = Instant::now();

        let outcome = match tokio::time::timeout(
            self.timeout,
            service.perform_research(&query, &topics),
        )
        .await
        {
            Ok(Ok(insights)) => {
                tracing::debug!(
                    stage = %stage,
                    findings = insights.findings.len(),
                    source = %insights.source,
                    "Research attached"
                );
                ResearchOutcome::Augmented { insights }
            }
            Ok(Err(e)) => {
                tracing::warn!(stage = %stage, "Research failed, continuing without it: {:#}", e);
                ResearchOutcome::Failed {
                    error: format!("{:#}", e),
                }
            }
            Err(_) => {
                tracing::warn!(
                    stage = %stage,
                    "Research timed out after {}ms, continuing without it",
                    self.timeout.as_millis()
                );
                ResearchOutcome::Failed {
                    error: format!("timed out after {}ms", self.timeout.as_millis()),
                }
            }
        };

        ResearchRecord {
            query,
            topics,
            outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}
