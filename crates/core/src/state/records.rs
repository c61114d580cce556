//! # Pipeline Records
//!
//! The creation request, the per-stage results, and the accumulated
//! `PipelineState` for one request.

use chrono::{DateTime, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::research::ResearchRecord;
use crate::skills::artifact_registry::{
    Concept, DeploymentPlan, DeploymentReceipt, GeneratedAgent, GenerationOptions,
    PostDeployReport, ValidationReport,
};
use crate::swarm::pipeline::{PipelineStatus, Stage};

const MAX_NAME_LEN: usize = 64;

/// What the caller wants built. Never mutated after submission.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CreationRequest {
    /// Agent name, e.g. `pricing-bot`
    pub name: String,
    /// Domain or type of agent, e.g. `finance`
    pub domain: String,
    /// Free-text purpose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Explicit capabilities; derived from `fields` when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    /// Any other requirement fields
    #[serde(default, flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl CreationRequest {
    pub fn new(name: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            domain: domain.to_string(),
            description: None,
            capabilities: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.push(capability.to_string());
        self
    }

    pub fn with_field(mut self, key: &str, value: serde_json::Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Deserialize untrusted JSON, naming the offending field when a typed
    /// field is missing or has the wrong type
    pub fn from_json(value: Value) -> PipelineResult<Self> {
        let Some(object) = value.as_object() else {
            return Err(PipelineError::invalid("requirements", "must be a JSON object"));
        };
        for field in ["name", "domain"] {
            match object.get(field) {
                Some(Value::String(_)) => {}
                None | Some(Value::Null) => return Err(PipelineError::invalid(field, "is required")),
                Some(_) => return Err(PipelineError::invalid(field, "must be a string")),
            }
        }
        if !matches!(
            object.get("description"),
            None | Some(Value::Null) | Some(Value::String(_))
        ) {
            return Err(PipelineError::invalid("description", "must be a string"));
        }
        match object.get("capabilities") {
            None => {}
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
            Some(_) => {
                return Err(PipelineError::invalid("capabilities", "must be a list of strings"));
            }
        }
        serde_json::from_value(value).map_err(|e| PipelineError::invalid("requirements", e.to_string()))
    }

    /// Basic shape validation run before a request id is issued
    pub fn validate(&self) -> PipelineResult<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(PipelineError::invalid("name", "must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(PipelineError::invalid(
                "name",
                format!("must be at most {} characters", MAX_NAME_LEN),
            ));
        }
        if !name_pattern().is_match(name) {
            return Err(PipelineError::invalid(
                "name",
                "must start with a letter or digit and contain only letters, digits, spaces, '-' or '_'",
            ));
        }
        if self.domain.trim().is_empty() {
            return Err(PipelineError::invalid("domain", "must not be empty"));
        }
        if matches!(&self.description, Some(d) if d.trim().is_empty()) {
            return Err(PipelineError::invalid("description", "must not be blank when present"));
        }

        let mut seen = HashSet::new();
        for capability in &self.capabilities {
            let normalized = capability.trim().to_lowercase();
            if normalized.is_empty() {
                return Err(PipelineError::invalid("capabilities", "must not contain blank entries"));
            }
            if !seen.insert(normalized) {
                return Err(PipelineError::invalid(
                    "capabilities",
                    format!("contains duplicate entry '{}'", capability.trim()),
                ));
            }
        }

        if self.fields.keys().any(|k| k.trim().is_empty()) {
            return Err(PipelineError::invalid("fields", "must not contain blank keys"));
        }
        Ok(())
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _-]*$").expect("valid name regex"))
}

/// Namespaces for generated ids. Ids are never interchangeable across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Request,
    Concept,
    Generation,
    Deployment,
}

impl RecordKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Request => "req",
            Self::Concept => "concept",
            Self::Generation => "generation",
            Self::Deployment => "deployment",
        }
    }

    pub fn new_id(&self) -> String {
        format!("{}-{}", self.prefix(), Uuid::new_v4())
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Concept => "concept",
            Self::Generation => "generation",
            Self::Deployment => "deployment",
        })
    }
}

/// Outcome flag carried by every stage result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failure,
}

/// Result of the Conceptualize stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conceptualization {
    pub concept_id: String,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub status: StageStatus,
    pub concept: Concept,
    /// In [0, 1]
    pub feasibility_score: f64,
    /// In [0, 10]
    pub strategic_value: f64,
    pub research: ResearchRecord,
}

/// Result of the Generate stage, including its validation sub-step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub generation_id: String,
    pub concept_id: String,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub status: StageStatus,
    pub options: GenerationOptions,
    pub artifact: GeneratedAgent,
    pub validation_result: ValidationReport,
    /// In [0, 1]
    pub quality_score: f64,
    pub research: ResearchRecord,
}

/// Result of the Deploy stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub deployment_id: String,
    pub generation_id: String,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub status: StageStatus,
    pub plan: DeploymentPlan,
    pub receipt: DeploymentReceipt,
    pub post_deployment: PostDeployReport,
    pub is_successful: bool,
    pub research: ResearchRecord,
}

/// Any stage result, tagged by stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageResult {
    Conceptualization(Conceptualization),
    Generation(GenerationResult),
    Deployment(DeploymentResult),
}

impl StageResult {
    pub fn id(&self) -> &str {
        match self {
            Self::Conceptualization(c) => &c.concept_id,
            Self::Generation(g) => &g.generation_id,
            Self::Deployment(d) => &d.deployment_id,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Conceptualization(_) => RecordKind::Concept,
            Self::Generation(_) => RecordKind::Generation,
            Self::Deployment(_) => RecordKind::Deployment,
        }
    }

    pub fn status(&self) -> StageStatus {
        match self {
            Self::Conceptualization(c) => c.status,
            Self::Generation(g) => g.status,
            Self::Deployment(d) => d.status,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Conceptualization(c) => c.created_at,
            Self::Generation(g) => g.created_at,
            Self::Deployment(d) => d.created_at,
        }
    }
}

/// Why a request ended up `Failed`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub stage: Stage,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Everything accumulated for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub request_id: String,
    pub request: CreationRequest,
    pub status: PipelineStatus,
    #[serde(default)]
    pub conceptualization: Option<Conceptualization>,
    #[serde(default)]
    pub generation: Option<GenerationResult>,
    #[serde(default)]
    pub deployment: Option<DeploymentResult>,
    #[serde(default)]
    pub failure: Option<FailureRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the registry on every accepted write
    pub revision: u64,
}

impl PipelineState {
    pub fn new(request_id: String, request: CreationRequest) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            request,
            status: PipelineStatus::Created,
            conceptualization: None,
            generation: None,
            deployment: None,
            failure: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Mark the request failed at `stage`
    pub fn mark_failed(&mut self, stage: Stage, reason: impl Into<String>) {
        self.status = PipelineStatus::Failed;
        self.failure = Some(FailureRecord {
            stage,
            reason: reason.into(),
            failed_at: Utc::now(),
        });
    }

    /// Stage ids present in this state, in pipeline order
    pub fn stage_ids(&self) -> Vec<(RecordKind, String)> {
        let mut ids = Vec::new();
        if let Some(c) = &self.conceptualization {
            ids.push((RecordKind::Concept, c.concept_id.clone()));
        }
        if let Some(g) = &self.generation {
            ids.push((RecordKind::Generation, g.generation_id.clone()));
        }
        if let Some(d) = &self.deployment {
            ids.push((RecordKind::Deployment, d.deployment_id.clone()));
        }
        ids
    }

    /// Stage results in pipeline order
    pub fn results(&self) -> Vec<StageResult> {
        let mut results = Vec::new();
        if let Some(c) = &self.conceptualization {
            results.push(StageResult::Conceptualization(c.clone()));
        }
        if let Some(g) = &self.generation {
            results.push(StageResult::Generation(g.clone()));
        }
        if let Some(d) = &self.deployment {
            results.push(StageResult::Deployment(d.clone()));
        }
        results
    }

    /// Check that every stage result has its predecessor and references it
    pub fn is_well_ordered(&self) -> bool {
        let generation_ok = match (&self.generation, &self.conceptualization) {
            (Some(g), Some(c)) => g.concept_id == c.concept_id,
            (Some(_), None) => false,
            (None, _) => true,
        };
        let deployment_ok = match (&self.deployment, &self.generation) {
            (Some(d), Some(g)) => d.generation_id == g.generation_id,
            (Some(_), None) => false,
            (None, _) => true,
        };
        generation_ok && deployment_ok
    }
}
