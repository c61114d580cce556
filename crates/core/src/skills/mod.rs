//! # Foundry Skills
//!
//! Stage capabilities invoked by the pipeline orchestrator.
//!
//! ## Architecture
//!
//! ```text
//! PipelineOrchestrator
//!   └── StageSet
//!         ├── Conceptualizer  (requirements → Concept)
//!         ├── Generator       (Concept → GeneratedAgent)
//!         ├── Validator       (GeneratedAgent → ValidationReport)
//!         └── Deployer        (DeploymentPlan → receipt, then verify)
//! ```
//!
//! Each capability is a trait so the orchestrator can be wired with the
//! blueprint implementations, test doubles, or anything else. Capabilities
//! return `anyhow::Result`; the orchestrator maps failures onto typed
//! pipeline errors.

pub mod artifact_registry;
pub mod scoring;

pub mod conceptualize_skill;
pub mod deploy_skill;
pub mod generate_skill;
pub mod validate_skill;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::research::ResearchInsights;
use crate::state::CreationRequest;
use crate::swarm::pipeline::Stage;
use artifact_registry::{
    Concept, DeploymentPlan, DeploymentReceipt, GeneratedAgent, GenerationOptions,
    PostDeployReport, ValidationReport,
};

pub use conceptualize_skill::BlueprintConceptualizer;
pub use deploy_skill::LocalDeployer;
pub use generate_skill::BlueprintGenerator;
pub use scoring::{BaselineScoring, ScoringStrategy};
pub use validate_skill::BlueprintValidator;

/// What a capability knows about the call it is serving
#[derive(Debug, Clone)]
pub struct StageContext {
    pub request_id: String,
    pub stage: Stage,
    /// Present only when research succeeded for this stage
    pub research: Option<ResearchInsights>,
}

impl StageContext {
    pub fn new(request_id: &str, stage: Stage) -> Self {
        Self {
            request_id: request_id.to_string(),
            stage,
            research: None,
        }
    }

    pub fn with_research(mut self, research: Option<ResearchInsights>) -> Self {
        self.research = research;
        self
    }
}

#[async_trait]
pub trait Conceptualizer: Send + Sync {
    async fn conceptualize(&self, request: &CreationRequest, ctx: &StageContext) -> Result<Concept>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        concept: &Concept,
        options: &GenerationOptions,
        ctx: &StageContext,
    ) -> Result<GeneratedAgent>;
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        concept: &Concept,
        agent: &GeneratedAgent,
        options: &GenerationOptions,
    ) -> Result<ValidationReport>;
}

#[async_trait]
pub trait Deployer: Send + Sync {
    /// Execute the plan
    async fn deploy(
        &self,
        plan: &DeploymentPlan,
        agent: &GeneratedAgent,
        ctx: &StageContext,
    ) -> Result<DeploymentReceipt>;

    /// Post-deployment verification of what `deploy` produced
    async fn verify(
        &self,
        plan: &DeploymentPlan,
        agent: &GeneratedAgent,
        receipt: &DeploymentReceipt,
    ) -> Result<PostDeployReport>;
}

/// The capabilities an orchestrator runs
#[derive(Clone)]
pub struct StageSet {
    pub conceptualizer: Arc<dyn Conceptualizer>,
    pub generator: Arc<dyn Generator>,
    pub validator: Arc<dyn Validator>,
    pub deployer: Arc<dyn Deployer>,
}

impl StageSet {
    /// Deterministic template-driven stages deploying under `output_root`
    pub fn blueprint(output_root: impl Into<PathBuf>) -> Self {
        Self {
            conceptualizer: Arc::new(BlueprintConceptualizer),
            generator: Arc::new(BlueprintGenerator),
            validator: Arc::new(BlueprintValidator),
            deployer: Arc::new(LocalDeployer::new(output_root)),
        }
    }

    pub fn with_conceptualizer(mut self, conceptualizer: Arc<dyn Conceptualizer>) -> Self {
        self.conceptualizer = conceptualizer;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_deployer(mut self, deployer: Arc<dyn Deployer>) -> Self {
        self.deployer = deployer;
        self
    }
}
