//! # Pipeline Orchestrator
//!
//! Drives creation requests through Conceptualize → Generate → Deploy for one
//! agent profile. Each stage call:
//!
//! 1. resolves its input id in the registry (`NotFound` otherwise),
//! 2. moves the request into the stage's in-flight status,
//! 3. consults research (best effort),
//! 4. runs the stage capability raced against its timeout and the cancel token,
//! 5. re-reads the state and stores the result with a revision check.
//!
//! Any stage failure marks the request `Failed` and surfaces a typed error.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use super::cancel::CancelToken;
use super::events::{PipelineEvent, PipelineEventKind};
use super::pipeline::{PipelineStatus, Stage};
use super::status::{AgentStatusSnapshot, StatusReporter, StatusSink, TracingStatusSink};
use crate::config::{AgentProfile, DeployConfig, FoundryConfig, StageTimeouts};
use crate::error::{PipelineError, PipelineResult};
use crate::research::{
    ResearchAugmenter, ResearchOutcome, ResearchPolicy, ResearchRecord, SearxResearchService,
};
use crate::skills::artifact_registry::{DeploymentConfig, DeploymentPlan, GenerationOptions};
use crate::skills::deploy_skill::{build_plan, pre_deployment_issues};
use crate::skills::scoring::{clamp_score, BaselineScoring, ScoringStrategy};
use crate::skills::{StageContext, StageSet};
use crate::state::{
    Conceptualization, CreationRequest, DeploymentResult, GenerationResult, PipelineState,
    RecordKind, RegistryError, RequestRegistry, StageStatus,
};

const FAIL_WRITE_ATTEMPTS: usize = 3;

/// All three stage results of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub conceptualization: Conceptualization,
    pub generation: GenerationResult,
    pub deployment: DeploymentResult,
}

/// Orchestrates the creation pipeline for one agent profile
pub struct PipelineOrchestrator {
    profile: AgentProfile,
    stages: StageSet,
    registry: Arc<RequestRegistry>,
    research: ResearchAugmenter,
    scoring: Arc<dyn ScoringStrategy>,
    reporter: StatusReporter,
    timeouts: StageTimeouts,
    deploy_settings: DeployConfig,
    min_quality: f64,
    event_tx: Option<broadcast::Sender<PipelineEvent>>,
}

impl PipelineOrchestrator {
    /// Orchestrator with the given stages and no research backend
    pub fn new(config: &FoundryConfig, stages: StageSet) -> Self {
        let registry = Arc::new(RequestRegistry::new());
        Self {
            profile: config.agent.clone(),
            stages,
            reporter: StatusReporter::new(
                config.agent.clone(),
                registry.clone(),
                Arc::new(TracingStatusSink),
            ),
            registry,
            research: ResearchAugmenter::unconfigured(),
            scoring: Arc::new(BaselineScoring::new(&config.scoring)),
            timeouts: config.timeouts.clone(),
            deploy_settings: config.deploy.clone(),
            min_quality: config.scoring.min_quality_for_deploy,
            event_tx: None,
        }
    }

    /// Blueprint stages, plus SearXNG research when a URL is configured
    pub fn from_config(config: &FoundryConfig) -> anyhow::Result<Self> {
        let orchestrator = Self::new(config, StageSet::blueprint(config.deploy.output_root.clone()));

        match (&config.research.searxng_url, config.research.policy) {
            (Some(url), ResearchPolicy::BestEffort) => {
                let service = SearxResearchService::new(
                    url,
                    config.research.max_results,
                    config.timeouts.research(),
                )?;
                tracing::info!("Research enabled via {}", service.endpoint());
                Ok(orchestrator.with_research(ResearchAugmenter::new(
                    Arc::new(service),
                    ResearchPolicy::BestEffort,
                    config.timeouts.research(),
                )))
            }
            (None, ResearchPolicy::BestEffort) => {
                tracing::info!("No research backend configured");
                Ok(orchestrator)
            }
            (_, ResearchPolicy::Disabled) => {
                tracing::info!("Research disabled");
                Ok(orchestrator.with_research(ResearchAugmenter::disabled()))
            }
        }
    }

    pub fn with_research(mut self, research: ResearchAugmenter) -> Self {
        self.research = research;
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.reporter = StatusReporter::new(self.profile.clone(), self.registry.clone(), sink);
        self
    }

    pub fn with_scoring(mut self, scoring: Arc<dyn ScoringStrategy>) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Emit pipeline events to `tx`
    pub fn with_event_channel(mut self, tx: broadcast::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    // ========================================================================
    // Stage calls
    // ========================================================================

    /// Validate requirements, register a new request and produce its concept
    #[tracing::instrument(skip(self, request, cancel), fields(name = %request.name, domain = %request.domain))]
    pub async fn conceptualize(
        &self,
        request: CreationRequest,
        cancel: &CancelToken,
    ) -> PipelineResult<Conceptualization> {
        const STAGE: Stage = Stage::Conceptualize;
        request.validate()?;

        let request_id = RecordKind::Request.new_id();
        self.ensure_live(cancel, STAGE, &request_id)?;

        let mut state = PipelineState::new(request_id.clone(), request);
        state.status = PipelineStatus::Conceptualizing;
        let state = self
            .registry
            .put(state)
            .map_err(|e| self.conflict(&request_id, STAGE, e))?;
        self.emit(
            PipelineEvent::new(PipelineEventKind::RequestAccepted, &self.profile.key)
                .for_request(&request_id),
        );
        let guard = self.in_flight(STAGE, &request_id);
        self.started(&request_id, STAGE);

        let result = self.run_conceptualize(&state, cancel).await;
        guard.disarm();
        self.settle(STAGE, &request_id, result)
    }

    async fn run_conceptualize(
        &self,
        state: &PipelineState,
        cancel: &CancelToken,
    ) -> PipelineResult<Conceptualization> {
        const STAGE: Stage = Stage::Conceptualize;
        let request_id = &state.request_id;

        let research = self.research(STAGE, &state.request, request_id, cancel).await?;
        let ctx = StageContext::new(request_id, STAGE).with_research(research.insights().cloned());

        let concept = self
            .run_stage(
                STAGE,
                request_id,
                cancel,
                self.stages.conceptualizer.conceptualize(&state.request, &ctx),
            )
            .await?;

        let result = Conceptualization {
            concept_id: RecordKind::Concept.new_id(),
            request_id: request_id.clone(),
            created_at: Utc::now(),
            status: StageStatus::Success,
            feasibility_score: clamp_score(self.scoring.feasibility(&concept), 0.0, 1.0),
            strategic_value: clamp_score(self.scoring.strategic_value(&concept), 0.0, 10.0),
            concept,
            research,
        };

        let stored = result.clone();
        self.complete(request_id, STAGE, move |s| s.conceptualization = Some(stored))?;
        self.completed(request_id, STAGE, &result.concept_id);
        Ok(result)
    }

    /// Generate and validate an agent from a stored concept
    #[tracing::instrument(skip(self, options, cancel))]
    pub async fn generate(
        &self,
        concept_id: &str,
        options: GenerationOptions,
        cancel: &CancelToken,
    ) -> PipelineResult<GenerationResult> {
        const STAGE: Stage = Stage::Generate;
        let state = self.registry.get_by_stage(RecordKind::Concept, concept_id)?;
        let request_id = state.request_id.clone();
        self.ensure_live(cancel, STAGE, &request_id)?;

        let state = self.begin(state, STAGE)?;
        let guard = self.in_flight(STAGE, &request_id);
        let result = self.run_generate(&state, options, cancel).await;
        guard.disarm();
        self.settle(STAGE, &request_id, result)
    }

    async fn run_generate(
        &self,
        state: &PipelineState,
        options: GenerationOptions,
        cancel: &CancelToken,
    ) -> PipelineResult<GenerationResult> {
        const STAGE: Stage = Stage::Generate;
        let request_id = &state.request_id;
        let conceptualization = state
            .conceptualization
            .as_ref()
            .ok_or_else(|| PipelineError::not_found(RecordKind::Concept, request_id))?;
        let concept = &conceptualization.concept;

        let research = self.research(STAGE, &state.request, request_id, cancel).await?;
        let ctx = StageContext::new(request_id, STAGE).with_research(research.insights().cloned());

        let artifact = self
            .run_stage(
                STAGE,
                request_id,
                cancel,
                self.stages.generator.generate(concept, &options, &ctx),
            )
            .await?;

        let validation_result = self
            .run_stage(
                Stage::Validate,
                request_id,
                cancel,
                self.stages.validator.validate(concept, &artifact, &options),
            )
            .await?;
        let quality_score = clamp_score(self.scoring.quality(&validation_result), 0.0, 1.0);

        if !validation_result.passed {
            tracing::warn!(
                request_id = %request_id,
                failed = validation_result.failures().len(),
                "Generated agent did not pass validation"
            );
        }

        let result = GenerationResult {
            generation_id: RecordKind::Generation.new_id(),
            concept_id: conceptualization.concept_id.clone(),
            request_id: request_id.clone(),
            created_at: Utc::now(),
            status: if validation_result.passed {
                StageStatus::Success
            } else {
                StageStatus::Failure
            },
            options,
            artifact,
            validation_result,
            quality_score,
            research,
        };

        let stored = result.clone();
        self.complete(request_id, STAGE, move |s| s.generation = Some(stored))?;
        self.completed(request_id, STAGE, &result.generation_id);
        Ok(result)
    }

    /// Deploy a stored generation.
    ///
    /// Pre-deployment validation runs before anything else touches the
    /// deployer; a rejected config leaves the request untouched.
    #[tracing::instrument(skip(self, config, cancel), fields(environment = %config.environment))]
    pub async fn deploy(
        &self,
        generation_id: &str,
        config: DeploymentConfig,
        cancel: &CancelToken,
    ) -> PipelineResult<DeploymentResult> {
        const STAGE: Stage = Stage::Deploy;
        let state = self.registry.get_by_stage(RecordKind::Generation, generation_id)?;
        let request_id = state.request_id.clone();
        let generation = state
            .generation
            .clone()
            .ok_or_else(|| PipelineError::not_found(RecordKind::Generation, generation_id))?;

        if state.status.begin(STAGE).is_none() {
            return Err(Self::invalid_transition(&state, STAGE));
        }
        self.ensure_live(cancel, STAGE, &request_id)?;

        let issues = pre_deployment_issues(&generation, &config, &self.deploy_settings, self.min_quality);
        if !issues.is_empty() {
            tracing::warn!(
                request_id = %request_id,
                issues = issues.len(),
                "Deployment rejected before execution"
            );
            self.emit(
                PipelineEvent::new(PipelineEventKind::DeploymentRejected, &self.profile.key)
                    .for_request(&request_id)
                    .at_stage(STAGE)
                    .with_data(serde_json::json!({ "issues": issues })),
            );
            return Err(PipelineError::PreDeploymentValidation {
                generation_id: generation_id.to_string(),
                issues,
            });
        }
        let plan = build_plan(&generation, &config, &self.deploy_settings);

        let state = self.begin(state, STAGE)?;
        let guard = self.in_flight(STAGE, &request_id);
        let result = self.run_deploy(&state, generation, plan, cancel).await;
        guard.disarm();
        self.settle(STAGE, &request_id, result)
    }

    async fn run_deploy(
        &self,
        state: &PipelineState,
        generation: GenerationResult,
        plan: DeploymentPlan,
        cancel: &CancelToken,
    ) -> PipelineResult<DeploymentResult> {
        const STAGE: Stage = Stage::Deploy;
        let request_id = &state.request_id;

        let research = self.research(STAGE, &state.request, request_id, cancel).await?;
        let ctx = StageContext::new(request_id, STAGE).with_research(research.insights().cloned());

        let receipt = self
            .run_stage(
                STAGE,
                request_id,
                cancel,
                self.stages.deployer.deploy(&plan, &generation.artifact, &ctx),
            )
            .await?;

        let post_deployment = self
            .run_stage(
                Stage::Validate,
                request_id,
                cancel,
                self.stages.deployer.verify(&plan, &generation.artifact, &receipt),
            )
            .await?;
        let is_successful = post_deployment.healthy;

        let result = DeploymentResult {
            deployment_id: RecordKind::Deployment.new_id(),
            generation_id: generation.generation_id.clone(),
            request_id: request_id.clone(),
            created_at: Utc::now(),
            status: if is_successful {
                StageStatus::Success
            } else {
                StageStatus::Failure
            },
            plan,
            receipt,
            post_deployment,
            is_successful,
            research,
        };

        let stored = result.clone();
        let failed_checks: Vec<String> = result
            .post_deployment
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{} ({})", c.name, c.detail))
            .collect();
        self.complete(request_id, STAGE, move |s| {
            s.deployment = Some(stored);
            if !is_successful {
                s.mark_failed(
                    STAGE,
                    format!("post-deployment verification failed: {}", failed_checks.join(", ")),
                );
            }
        })?;

        if is_successful {
            self.completed(request_id, STAGE, &result.deployment_id);
        } else {
            tracing::warn!(request_id = %request_id, "Deployment failed post-deployment verification");
            self.emit(
                PipelineEvent::new(PipelineEventKind::StageFailed, &self.profile.key)
                    .for_request(request_id)
                    .at_stage(STAGE)
                    .with_data(serde_json::json!({ "deployment_id": result.deployment_id })),
            );
        }
        Ok(result)
    }

    /// Conceptualize, generate and deploy in one go
    pub async fn run_to_completion(
        &self,
        request: CreationRequest,
        options: GenerationOptions,
        config: DeploymentConfig,
        cancel: &CancelToken,
    ) -> PipelineResult<PipelineRun> {
        let conceptualization = self.conceptualize(request, cancel).await?;
        let generation = self
            .generate(&conceptualization.concept_id, options, cancel)
            .await?;
        let deployment = self.deploy(&generation.generation_id, config, cancel).await?;
        Ok(PipelineRun {
            conceptualization,
            generation,
            deployment,
        })
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn get_status(&self) -> AgentStatusSnapshot {
        self.reporter.snapshot()
    }

    pub fn get_state(&self, request_id: &str) -> PipelineResult<PipelineState> {
        self.registry.require(request_id)
    }

    /// Resolve a request id or any stage id to its request
    pub fn find_by_stage_id(&self, id: &str) -> PipelineResult<PipelineState> {
        self.registry
            .lookup(id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::Request, id))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn ensure_live(&self, cancel: &CancelToken, stage: Stage, request_id: &str) -> PipelineResult<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                stage,
                request_id: request_id.to_string(),
            });
        }
        Ok(())
    }

    /// Race a stage future against its timeout and the cancel token
    async fn run_stage<T, F>(
        &self,
        stage: Stage,
        request_id: &str,
        cancel: &CancelToken,
        fut: F,
    ) -> PipelineResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let limit = self.timeouts.for_stage(stage);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled {
                stage,
                request_id: request_id.to_string(),
            }),
            outcome = tokio::time::timeout(limit, fut) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(PipelineError::StageExecution {
                    stage,
                    request_id: request_id.to_string(),
                    message: format!("{:#}", e),
                }),
                Err(_) => Err(PipelineError::StageTimeout {
                    stage,
                    request_id: request_id.to_string(),
                    timeout: limit,
                }),
            },
        }
    }

    /// Best-effort research, with cancellation checked around the await
    async fn research(
        &self,
        stage: Stage,
        request: &CreationRequest,
        request_id: &str,
        cancel: &CancelToken,
    ) -> PipelineResult<ResearchRecord> {
        self.ensure_live(cancel, stage, request_id)?;
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PipelineError::Cancelled {
                    stage,
                    request_id: request_id.to_string(),
                });
            }
            record = self.research.augment(stage, request) => record,
        };
        self.ensure_live(cancel, stage, request_id)?;

        let (kind, data) = match &record.outcome {
            ResearchOutcome::Augmented { insights } => (
                PipelineEventKind::ResearchCompleted,
                serde_json::json!({ "source": insights.source, "findings": insights.findings.len() }),
            ),
            ResearchOutcome::Failed { error } => (
                PipelineEventKind::ResearchFailed,
                serde_json::json!({ "error": error }),
            ),
            ResearchOutcome::Skipped { reason } => (
                PipelineEventKind::ResearchSkipped,
                serde_json::json!({ "reason": reason }),
            ),
        };
        self.emit(
            PipelineEvent::new(kind, &self.profile.key)
                .for_request(request_id)
                .at_stage(stage)
                .with_data(data),
        );
        Ok(record)
    }

    fn invalid_transition(state: &PipelineState, stage: Stage) -> PipelineError {
        PipelineError::InvalidTransition {
            request_id: state.request_id.clone(),
            status: state.status,
            stage,
        }
    }

    /// A write lost to a concurrent one
    fn conflict(&self, request_id: &str, stage: Stage, err: RegistryError) -> PipelineError {
        tracing::warn!(request_id = %request_id, stage = %stage, "Registry write rejected: {}", err);
        PipelineError::InvalidTransition {
            request_id: request_id.to_string(),
            status: self
                .registry
                .get(request_id)
                .map(|s| s.status)
                .unwrap_or_default(),
            stage,
        }
    }

    /// Move a request into the in-flight status for `stage`
    fn begin(&self, mut state: PipelineState, stage: Stage) -> PipelineResult<PipelineState> {
        let next = state
            .status
            .begin(stage)
            .ok_or_else(|| Self::invalid_transition(&state, stage))?;
        state.status = next;
        let request_id = state.request_id.clone();
        let stored = self
            .registry
            .put(state)
            .map_err(|e| self.conflict(&request_id, stage, e))?;
        self.started(&request_id, stage);
        Ok(stored)
    }

    /// Re-read the state after the stage's awaits, advance it and apply
    /// the stage result
    fn complete(
        &self,
        request_id: &str,
        stage: Stage,
        apply: impl FnOnce(&mut PipelineState),
    ) -> PipelineResult<()> {
        let mut state = self.registry.require(request_id)?;
        if state.status.in_flight_stage() != Some(stage) {
            return Err(Self::invalid_transition(&state, stage));
        }
        state.status = state.status.advance();
        apply(&mut state);
        self.registry
            .put(state)
            .map_err(|e| self.conflict(request_id, stage, e))?;
        Ok(())
    }

    fn in_flight(&self, stage: Stage, request_id: &str) -> InFlight<'_> {
        InFlight {
            orchestrator: self,
            stage,
            request_id: request_id.to_string(),
            armed: true,
        }
    }

    /// Record a stage failure on the request, then hand the result back
    fn settle<T>(&self, stage: Stage, request_id: &str, result: PipelineResult<T>) -> PipelineResult<T> {
        if let Err(e) = &result {
            if e.is_stage_failure() {
                self.fail(stage, request_id, e);
            }
        }
        self.publish_status();
        result
    }

    fn fail(&self, stage: Stage, request_id: &str, err: &PipelineError) {
        tracing::warn!(request_id = %request_id, stage = %stage, "Stage failed: {}", err);

        for _ in 0..FAIL_WRITE_ATTEMPTS {
            let Some(mut state) = self.registry.get(request_id) else {
                break;
            };
            if state.status.is_terminal() {
                break;
            }
            state.mark_failed(stage, err.to_string());
            match self.registry.put(state) {
                Ok(_) => break,
                Err(RegistryError::StaleRevision { .. }) => continue,
                Err(e) => {
                    tracing::warn!(request_id = %request_id, "Could not record failure: {}", e);
                    break;
                }
            }
        }

        self.emit(
            PipelineEvent::new(PipelineEventKind::StageFailed, &self.profile.key)
                .for_request(request_id)
                .at_stage(stage)
                .with_data(serde_json::json!({ "error": err.to_string() })),
        );
    }

    fn started(&self, request_id: &str, stage: Stage) {
        tracing::debug!(request_id = %request_id, stage = %stage, "Stage started");
        self.emit(
            PipelineEvent::new(PipelineEventKind::StageStarted, &self.profile.key)
                .for_request(request_id)
                .at_stage(stage),
        );
        self.publish_status();
    }

    fn completed(&self, request_id: &str, stage: Stage, result_id: &str) {
        tracing::info!(request_id = %request_id, stage = %stage, result_id = %result_id, "Stage completed");
        self.emit(
            PipelineEvent::new(PipelineEventKind::StageCompleted, &self.profile.key)
                .for_request(request_id)
                .at_stage(stage)
                .with_data(serde_json::json!({ "id": result_id })),
        );
    }

    fn publish_status(&self) {
        if let Some(activity) = self.reporter.publish() {
            self.emit(
                PipelineEvent::new(PipelineEventKind::StatusChanged, &self.profile.key)
                    .with_data(serde_json::json!({ "activity": activity })),
            );
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.event_tx {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }
}

/// Held across a stage's awaits. Dropping it while armed (the caller
/// dropped the stage future) fails the request as cancelled.
struct InFlight<'a> {
    orchestrator: &'a PipelineOrchestrator,
    stage: Stage,
    request_id: String,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(
            request_id = %self.request_id,
            stage = %self.stage,
            "Stage call dropped before completion"
        );
        let err = PipelineError::Cancelled {
            stage: self.stage,
            request_id: self.request_id.clone(),
        };
        self.orchestrator.fail(self.stage, &self.request_id, &err);
        self.orchestrator.publish_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::artifact_registry::Concept;
    use crate::skills::{Conceptualizer, Generator};
    use crate::swarm::status::AgentActivity;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FailingConceptualizer;

    #[async_trait]
    impl Conceptualizer for FailingConceptualizer {
        async fn conceptualize(&self, _r: &CreationRequest, _c: &StageContext) -> anyhow::Result<Concept> {
            anyhow::bail!("persona model unavailable")
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        async fn generate(
            &self,
            _concept: &Concept,
            _options: &GenerationOptions,
            _ctx: &StageContext,
        ) -> anyhow::Result<crate::skills::artifact_registry::GeneratedAgent> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            anyhow::bail!("unreachable")
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<AgentActivity>>,
    }

    impl StatusSink for RecordingSink {
        fn update_agent_status(&self, _key: &str, _name: &str, activity: AgentActivity) {
            self.calls.lock().unwrap().push(activity);
        }
    }

    fn orchestrator(dir: &std::path::Path) -> PipelineOrchestrator {
        let mut config = FoundryConfig::default();
        config.deploy.output_root = dir.to_path_buf();
        PipelineOrchestrator::new(&config, StageSet::blueprint(dir))
    }

    fn request() -> CreationRequest {
        CreationRequest::new("pricing-bot", "finance").with_capability("quote")
    }

    #[tokio::test]
    async fn test_conceptualize_stores_result() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        let cancel = CancelToken::new();

        let concept = orchestrator.conceptualize(request(), &cancel).await.unwrap();
        assert!(concept.concept_id.starts_with("concept-"));
        assert_eq!(concept.feasibility_score, 0.85);
        assert_eq!(concept.strategic_value, 8.0);

        let state = orchestrator.get_state(&concept.request_id).unwrap();
        assert_eq!(state.status, PipelineStatus::Conceptualized);
        assert_eq!(state.revision, 2);
        assert_eq!(
            orchestrator.find_by_stage_id(&concept.concept_id).unwrap().request_id,
            concept.request_id
        );
    }

    #[tokio::test]
    async fn test_invalid_requirements_register_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        let err = orchestrator
            .conceptualize(CreationRequest::new("", "finance"), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequirements { .. }));
        assert!(orchestrator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_stage_error_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = PipelineOrchestrator::new(
            &FoundryConfig::default(),
            StageSet::blueprint(dir.path()).with_conceptualizer(Arc::new(FailingConceptualizer)),
        );

        let err = orchestrator
            .conceptualize(request(), &CancelToken::new())
            .await
            .unwrap_err();
        match &err {
            PipelineError::StageExecution { stage, message, .. } => {
                assert_eq!(*stage, Stage::Conceptualize);
                assert!(message.contains("persona model unavailable"));
            }
            other => panic!("unexpected error {:?}", other),
        }

        let state = orchestrator.registry().states().pop().unwrap();
        assert_eq!(state.status, PipelineStatus::Failed);
        assert_eq!(state.failure.unwrap().stage, Stage::Conceptualize);
        assert_eq!(orchestrator.get_status().failed, 1);
    }

    #[tokio::test]
    async fn test_generate_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = PipelineOrchestrator::new(
            &FoundryConfig::default(),
            StageSet::blueprint(dir.path()).with_generator(Arc::new(SlowGenerator)),
        )
        .with_timeouts(StageTimeouts::uniform(50));
        let cancel = CancelToken::new();

        let concept = orchestrator.conceptualize(request(), &cancel).await.unwrap();
        let err = orchestrator
            .generate(&concept.concept_id, GenerationOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageTimeout { stage: Stage::Generate, .. }
        ));
        let state = orchestrator.get_state(&concept.request_id).unwrap();
        assert_eq!(state.status, PipelineStatus::Failed);
        assert!(state.generation.is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_stage() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            &FoundryConfig::default(),
            StageSet::blueprint(dir.path()).with_generator(Arc::new(SlowGenerator)),
        ));
        let cancel = CancelToken::new();
        let concept = orchestrator.conceptualize(request(), &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = orchestrator
            .generate(&concept.concept_id, GenerationOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { stage: Stage::Generate, .. }));
        assert_eq!(
            orchestrator.get_state(&concept.request_id).unwrap().status,
            PipelineStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_dropped_stage_call_fails_request() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = PipelineOrchestrator::new(
            &FoundryConfig::default(),
            StageSet::blueprint(dir.path()).with_generator(Arc::new(SlowGenerator)),
        );
        let cancel = CancelToken::new();
        let concept = orchestrator.conceptualize(request(), &cancel).await.unwrap();

        let outer = tokio::time::timeout(
            Duration::from_millis(50),
            orchestrator.generate(&concept.concept_id, GenerationOptions::default(), &cancel),
        )
        .await;
        assert!(outer.is_err());

        let state = orchestrator.get_state(&concept.request_id).unwrap();
        assert_eq!(state.status, PipelineStatus::Failed);
        assert_eq!(state.failure.unwrap().stage, Stage::Generate);
        assert!(!orchestrator.get_status().is_active);

        let err = orchestrator
            .generate(&concept.concept_id, GenerationOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition { status: PipelineStatus::Failed, .. }
        ));
    }

    #[tokio::test]
    async fn test_completed_stage_leaves_no_failure() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        let concept = orchestrator
            .conceptualize(request(), &CancelToken::new())
            .await
            .unwrap();
        let state = orchestrator.get_state(&concept.request_id).unwrap();
        assert!(state.failure.is_none());
        assert_eq!(state.status, PipelineStatus::Conceptualized);
    }

    #[tokio::test]
    async fn test_research_without_backend_is_skipped_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FoundryConfig::default();
        config.deploy.output_root = dir.path().to_path_buf();
        config.research.searxng_url = None;
        config.research.policy = ResearchPolicy::BestEffort;
        let orchestrator = PipelineOrchestrator::from_config(&config).unwrap();

        let concept = orchestrator
            .conceptualize(request(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(
            concept.research.outcome,
            ResearchOutcome::Skipped {
                reason: "no research backend configured".into()
            }
        );

        config.research.policy = ResearchPolicy::Disabled;
        let orchestrator = PipelineOrchestrator::from_config(&config).unwrap();
        let concept = orchestrator
            .conceptualize(request(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(
            concept.research.outcome,
            ResearchOutcome::Skipped {
                reason: "research disabled by policy".into()
            }
        );
    }

    #[tokio::test]
    async fn test_status_sink_sees_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = PipelineOrchestrator::new(
            &FoundryConfig::default(),
            StageSet::blueprint(dir.path()),
        )
        .with_status_sink(sink.clone());

        orchestrator
            .conceptualize(request(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(
            *sink.calls.lock().unwrap(),
            vec![AgentActivity::Active, AgentActivity::Inactive]
        );
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = broadcast::channel(64);
        let orchestrator = orchestrator(dir.path()).with_event_channel(tx);

        orchestrator
            .conceptualize(request(), &CancelToken::new())
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![
                PipelineEventKind::RequestAccepted,
                PipelineEventKind::StageStarted,
                PipelineEventKind::StatusChanged,
                PipelineEventKind::ResearchSkipped,
                PipelineEventKind::StageCompleted,
                PipelineEventKind::StatusChanged,
            ]
        );
    }
}
