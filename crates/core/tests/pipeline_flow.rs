//! End-to-end behaviour of the pipeline through the public API.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use foundry_core::config::FoundryConfig;
use foundry_core::research::{
    Finding, ResearchAugmenter, ResearchInsights, ResearchPolicy, ResearchService, StaticResearch,
};
use foundry_core::skills::artifact_registry::{
    Concept, DeploymentConfig, DeploymentPlan, DeploymentReceipt, GeneratedAgent,
    GenerationOptions, PostDeployReport, ValidationCheck,
};
use foundry_core::skills::{BlueprintGenerator, Deployer, Generator, StageContext, StageSet};
use foundry_core::state::{CreationRequest, RecordKind};
use foundry_core::swarm::{CancelToken, PipelineOrchestrator, PipelineStatus, Stage};
use foundry_core::PipelineError;

struct FailingResearch;

#[async_trait]
impl ResearchService for FailingResearch {
    async fn perform_research(&self, _query: &str, _topics: &[String]) -> anyhow::Result<ResearchInsights> {
        anyhow::bail!("knowledge service returned 503")
    }
}

/// Counts calls and reports whatever health it was built with
struct SpyDeployer {
    deploys: AtomicUsize,
    healthy: bool,
}

impl SpyDeployer {
    fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            deploys: AtomicUsize::new(0),
            healthy,
        })
    }

    fn deploy_count(&self) -> usize {
        self.deploys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Deployer for SpyDeployer {
    async fn deploy(
        &self,
        plan: &DeploymentPlan,
        agent: &GeneratedAgent,
        _ctx: &StageContext,
    ) -> anyhow::Result<DeploymentReceipt> {
        self.deploys.fetch_add(1, Ordering::SeqCst);
        Ok(DeploymentReceipt {
            location: plan.target.clone(),
            files_written: agent.files.iter().map(|f| f.path.clone()).collect(),
            bytes_written: agent.total_bytes(),
            completed_steps: vec!["materialize".into()],
        })
    }

    async fn verify(
        &self,
        _plan: &DeploymentPlan,
        _agent: &GeneratedAgent,
        _receipt: &DeploymentReceipt,
    ) -> anyhow::Result<PostDeployReport> {
        let check = if self.healthy {
            ValidationCheck::pass("health_check", "ok")
        } else {
            ValidationCheck::fail("health_check", "connection refused")
        };
        Ok(PostDeployReport::from_checks(vec![check]))
    }
}

/// Blueprint generation after a short delay, so concurrent calls overlap
struct DelayedGenerator;

#[async_trait]
impl Generator for DelayedGenerator {
    async fn generate(
        &self,
        concept: &Concept,
        options: &GenerationOptions,
        ctx: &StageContext,
    ) -> anyhow::Result<GeneratedAgent> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        BlueprintGenerator.generate(concept, options, ctx).await
    }
}

fn config(dir: &Path) -> FoundryConfig {
    let mut config = FoundryConfig::default();
    config.deploy.output_root = dir.to_path_buf();
    config
}

fn orchestrator(dir: &Path) -> PipelineOrchestrator {
    PipelineOrchestrator::new(&config(dir), StageSet::blueprint(dir))
}

fn pricing_bot() -> CreationRequest {
    CreationRequest::new("pricing-bot", "finance")
}

#[tokio::test]
async fn pricing_bot_runs_through_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path());
    let cancel = CancelToken::new();

    let concept = assert_ok!(orchestrator.conceptualize(pricing_bot(), &cancel).await);
    assert!(concept.concept_id.starts_with("concept-"));
    assert!((0.0..=1.0).contains(&concept.feasibility_score));
    assert!((0.0..=10.0).contains(&concept.strategic_value));

    let generation = assert_ok!(
        orchestrator
            .generate(&concept.concept_id, GenerationOptions::default(), &cancel)
            .await
    );
    assert!(generation.generation_id.starts_with("generation-"));
    assert_eq!(generation.concept_id, concept.concept_id);
    assert!((0.0..=1.0).contains(&generation.quality_score));
    assert!(generation.validation_result.passed);

    let deployment = assert_ok!(
        orchestrator
            .deploy(&generation.generation_id, DeploymentConfig::new("staging"), &cancel)
            .await
    );
    assert!(deployment.deployment_id.starts_with("deployment-"));
    assert!(deployment.is_successful);
    assert!(dir.path().join("staging/pricing-bot/agent.json").exists());

    let state = orchestrator.get_state(&concept.request_id).unwrap();
    assert_eq!(state.status, PipelineStatus::Deployed);
    assert!(state.is_well_ordered());
    let kinds: Vec<RecordKind> = state.stage_ids().into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        kinds,
        vec![RecordKind::Concept, RecordKind::Generation, RecordKind::Deployment]
    );
}

#[tokio::test]
async fn generate_rejects_unknown_concept() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path());

    let err = assert_err!(
        orchestrator
            .generate("concept-does-not-exist", GenerationOptions::default(), &CancelToken::new())
            .await
    );
    assert!(matches!(err, PipelineError::NotFound { kind: RecordKind::Concept, .. }));
    assert!(err.to_string().contains("concept-does-not-exist"));
}

#[tokio::test]
async fn stage_ids_are_not_interchangeable() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path());
    let cancel = CancelToken::new();
    let concept = orchestrator.conceptualize(pricing_bot(), &cancel).await.unwrap();

    let err = orchestrator
        .deploy(&concept.concept_id, DeploymentConfig::new("staging"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { kind: RecordKind::Generation, .. }));

    let err = orchestrator
        .generate(&concept.request_id, GenerationOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { .. }));
}

#[tokio::test]
async fn ids_from_another_orchestrator_are_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let first = orchestrator(dir.path());
    let second = orchestrator(dir.path());
    let cancel = CancelToken::new();

    let concept = first.conceptualize(pricing_bot(), &cancel).await.unwrap();
    let err = second
        .generate(&concept.concept_id, GenerationOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { .. }));
}

#[tokio::test]
async fn status_snapshot_is_stable_without_activity() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path());
    orchestrator
        .conceptualize(pricing_bot(), &CancelToken::new())
        .await
        .unwrap();

    let first = orchestrator.get_status();
    let second = orchestrator.get_status();
    assert!(first.same_counts(&second));
    assert!(!first.is_active);
    assert_eq!(first.conceptualizations.live, 1);
    assert_eq!(first.generations.live, 0);
}

#[tokio::test]
async fn research_failure_does_not_fail_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).with_research(ResearchAugmenter::new(
        Arc::new(FailingResearch),
        ResearchPolicy::BestEffort,
        Duration::from_secs(1),
    ));

    let concept = assert_ok!(
        orchestrator
            .conceptualize(pricing_bot(), &CancelToken::new())
            .await
    );
    assert!(concept.research.is_failed());
    assert!(concept.concept.research_notes.is_empty());
}

#[tokio::test]
async fn research_findings_reach_the_concept() {
    let dir = tempfile::tempdir().unwrap();
    let insights = ResearchInsights {
        source: "fixture".into(),
        findings: vec![Finding {
            title: "Dynamic pricing".into(),
            url: None,
            snippet: "price by demand".into(),
        }],
    };
    let orchestrator = orchestrator(dir.path()).with_research(ResearchAugmenter::new(
        Arc::new(StaticResearch::new(insights)),
        ResearchPolicy::BestEffort,
        Duration::from_secs(1),
    ));

    let concept = orchestrator
        .conceptualize(pricing_bot(), &CancelToken::new())
        .await
        .unwrap();
    assert!(concept.research.query.contains("finance"));
    assert_eq!(
        concept.concept.research_notes,
        vec!["Dynamic pricing: price by demand"]
    );
}

#[tokio::test]
async fn invalid_deployment_config_never_reaches_the_deployer() {
    let dir = tempfile::tempdir().unwrap();
    let spy = SpyDeployer::new(true);
    let orchestrator = PipelineOrchestrator::new(
        &config(dir.path()),
        StageSet::blueprint(dir.path()).with_deployer(spy.clone()),
    );
    let cancel = CancelToken::new();

    let concept = orchestrator.conceptualize(pricing_bot(), &cancel).await.unwrap();
    let generation = orchestrator
        .generate(&concept.concept_id, GenerationOptions::default(), &cancel)
        .await
        .unwrap();

    let mut bad = DeploymentConfig::new("");
    bad.replicas = 0;
    let err = orchestrator
        .deploy(&generation.generation_id, bad, &cancel)
        .await
        .unwrap_err();
    match err {
        PipelineError::PreDeploymentValidation { issues, .. } => assert_eq!(issues.len(), 2),
        other => panic!("expected PreDeploymentValidation, got {:?}", other),
    }
    assert_eq!(spy.deploy_count(), 0);

    // Still deployable once the config is fixed
    let state = orchestrator.get_state(&concept.request_id).unwrap();
    assert_eq!(state.status, PipelineStatus::Generated);
    let deployment = orchestrator
        .deploy(&generation.generation_id, DeploymentConfig::new("staging"), &cancel)
        .await
        .unwrap();
    assert!(deployment.is_successful);
    assert_eq!(spy.deploy_count(), 1);
}

#[tokio::test]
async fn repeat_deploy_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path());
    let cancel = CancelToken::new();

    let concept = orchestrator.conceptualize(pricing_bot(), &cancel).await.unwrap();
    let generation = orchestrator
        .generate(&concept.concept_id, GenerationOptions::default(), &cancel)
        .await
        .unwrap();
    orchestrator
        .deploy(&generation.generation_id, DeploymentConfig::new("staging"), &cancel)
        .await
        .unwrap();

    let err = orchestrator
        .deploy(&generation.generation_id, DeploymentConfig::new("staging"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InvalidTransition {
            status: PipelineStatus::Deployed,
            stage: Stage::Deploy,
            ..
        }
    ));

    let err = orchestrator
        .generate(&concept.concept_id, GenerationOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn unhealthy_deployment_fails_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(
        &config(dir.path()),
        StageSet::blueprint(dir.path()).with_deployer(SpyDeployer::new(false)),
    );
    let cancel = CancelToken::new();

    let run = orchestrator
        .conceptualize(pricing_bot(), &cancel)
        .await
        .unwrap();
    let generation = orchestrator
        .generate(&run.concept_id, GenerationOptions::default(), &cancel)
        .await
        .unwrap();
    let deployment = orchestrator
        .deploy(&generation.generation_id, DeploymentConfig::new("production"), &cancel)
        .await
        .unwrap();

    assert!(!deployment.is_successful);
    let state = orchestrator.get_state(&run.request_id).unwrap();
    assert_eq!(state.status, PipelineStatus::Failed);
    assert!(state.deployment.is_some());
    assert!(state.failure.unwrap().reason.contains("connection refused"));
}

#[tokio::test]
async fn cancelled_token_stops_before_any_stage() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = orchestrator
        .conceptualize(pricing_bot(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled { stage: Stage::Conceptualize, .. }));
    assert!(orchestrator.registry().is_empty());
}

#[tokio::test]
async fn run_to_completion_chains_the_stages() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path());

    let run = orchestrator
        .run_to_completion(
            pricing_bot().with_capability("quote"),
            GenerationOptions::default(),
            DeploymentConfig::new("development"),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(run.generation.concept_id, run.conceptualization.concept_id);
    assert_eq!(run.deployment.generation_id, run.generation.generation_id);
    assert!(run.deployment.is_successful);
    assert_eq!(orchestrator.get_status().deployments.live, 1);
}

#[tokio::test]
async fn concurrent_generate_on_one_concept_has_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(
        &config(dir.path()),
        StageSet::blueprint(dir.path()).with_generator(Arc::new(DelayedGenerator)),
    );
    let cancel = CancelToken::new();
    let concept = assert_ok!(orchestrator.conceptualize(pricing_bot(), &cancel).await);

    let (first, second) = tokio::join!(
        orchestrator.generate(&concept.concept_id, GenerationOptions::default(), &cancel),
        orchestrator.generate(&concept.concept_id, GenerationOptions::default(), &cancel),
    );
    let (won, lost) = match (first, second) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        (first, second) => panic!("expected one winner, got {:?} and {:?}", first, second),
    };
    assert!(matches!(
        lost,
        PipelineError::InvalidTransition { stage: Stage::Generate, .. }
    ));

    let state = assert_ok!(orchestrator.get_state(&concept.request_id));
    assert_eq!(state.status, PipelineStatus::Generated);
    assert_eq!(state.generation.unwrap().generation_id, won.generation_id);
}

#[tokio::test]
async fn concurrent_deploy_on_one_generation_has_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let deployer = SpyDeployer::new(true);
    let orchestrator = PipelineOrchestrator::new(
        &config(dir.path()),
        StageSet::blueprint(dir.path()).with_deployer(deployer.clone()),
    );
    let cancel = CancelToken::new();
    let concept = assert_ok!(orchestrator.conceptualize(pricing_bot(), &cancel).await);
    let generation = assert_ok!(
        orchestrator
            .generate(&concept.concept_id, GenerationOptions::default(), &cancel)
            .await
    );

    let (first, second) = tokio::join!(
        orchestrator.deploy(&generation.generation_id, DeploymentConfig::new("staging"), &cancel),
        orchestrator.deploy(&generation.generation_id, DeploymentConfig::new("staging"), &cancel),
    );
    assert_eq!(first.is_ok() as usize + second.is_ok() as usize, 1);
    let lost = if first.is_err() { first } else { second };
    assert!(matches!(
        assert_err!(lost),
        PipelineError::InvalidTransition { stage: Stage::Deploy, .. }
    ));
    assert_eq!(deployer.deploy_count(), 1);
}

#[tokio::test]
async fn different_requests_run_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(
        &config(dir.path()),
        StageSet::blueprint(dir.path()).with_generator(Arc::new(DelayedGenerator)),
    );
    let cancel = CancelToken::new();

    let (pricing, support) = tokio::join!(
        orchestrator.run_to_completion(
            pricing_bot(),
            GenerationOptions::default(),
            DeploymentConfig::new("staging"),
            &cancel,
        ),
        orchestrator.run_to_completion(
            CreationRequest::new("support-bot", "customer service"),
            GenerationOptions::default(),
            DeploymentConfig::new("staging"),
            &cancel,
        ),
    );
    let pricing = assert_ok!(pricing);
    let support = assert_ok!(support);
    assert_ne!(
        pricing.conceptualization.request_id,
        support.conceptualization.request_id
    );

    for run in [&pricing, &support] {
        let state = assert_ok!(orchestrator.get_state(&run.conceptualization.request_id));
        assert_eq!(state.status, PipelineStatus::Deployed);
    }
    let status = orchestrator.get_status();
    assert!(!status.is_active);
    assert_eq!(status.total_requests, 2);
}
