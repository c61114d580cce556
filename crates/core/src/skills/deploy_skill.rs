//! # Deploy Skill
//!
//! Plan construction, pre-deployment validation, and a deployer that
//! materializes the generated package into a directory per environment.
//!
//! ```text
//! <output_root>/<environment>/<slug>/
//!   ├── agent.json, README.md, src/..., tests/...
//!   └── deployment.json   (the plan that produced this directory)
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use super::artifact_registry::{
    DeployStrategy, DeploymentConfig, DeploymentPlan, DeploymentReceipt, DeploymentStep,
    GeneratedAgent, PostDeployReport, ValidationCheck,
};
use super::{Deployer, StageContext};
use crate::config::DeployConfig;
use crate::state::GenerationResult;

pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/health";
pub const PLAN_FILE: &str = "deployment.json";

fn env_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("valid env key regex"))
}

/// Relative, and never escaping its root
fn is_safe_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Everything that must hold before a deployment may start.
///
/// Returns all problems found, not just the first.
pub fn pre_deployment_issues(
    generation: &GenerationResult,
    config: &DeploymentConfig,
    settings: &DeployConfig,
    min_quality: f64,
) -> Vec<String> {
    let mut issues = Vec::new();

    let environment = config.environment.trim();
    if environment.is_empty() {
        issues.push("environment must not be empty".to_string());
    } else if !settings
        .allowed_environments
        .iter()
        .any(|e| e == environment)
    {
        issues.push(format!(
            "environment '{}' is not one of: {}",
            environment,
            settings.allowed_environments.join(", ")
        ));
    }

    if config.replicas == 0 {
        issues.push("replicas must be at least 1".to_string());
    } else if config.replicas > settings.max_replicas {
        issues.push(format!(
            "replicas {} exceeds the maximum of {}",
            config.replicas, settings.max_replicas
        ));
    }

    if let Some(path) = &config.health_check_path {
        if !path.starts_with('/') {
            issues.push(format!("health check path '{}' must start with '/'", path));
        }
    }

    for key in config.env.keys() {
        if !env_key_pattern().is_match(key) {
            issues.push(format!("environment variable name '{}' is invalid", key));
        }
    }

    if !generation.validation_result.passed {
        let failed: Vec<&str> = generation
            .validation_result
            .failures()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        issues.push(format!("generation did not pass validation ({})", failed.join(", ")));
    }
    if generation.quality_score < min_quality {
        issues.push(format!(
            "quality score {:.2} is below the deploy minimum of {:.2}",
            generation.quality_score, min_quality
        ));
    }

    for file in &generation.artifact.files {
        if !is_safe_relative(&file.path) {
            issues.push(format!("artifact path '{}' escapes the deployment root", file.path));
        }
    }

    issues
}

/// Build the deployment pipeline descriptor for a validated configuration
pub fn build_plan(
    generation: &GenerationResult,
    config: &DeploymentConfig,
    settings: &DeployConfig,
) -> DeploymentPlan {
    let environment = config.environment.trim().to_string();
    let slug = &generation.artifact.slug;
    let target = settings.output_root.join(&environment).join(slug);
    let health_check_path = config
        .health_check_path
        .clone()
        .unwrap_or_else(|| DEFAULT_HEALTH_CHECK_PATH.to_string());

    let rollout = match config.strategy {
        DeployStrategy::Rolling => format!("Replace instances one at a time up to {}", config.replicas),
        DeployStrategy::Recreate => format!("Stop all instances, then start {}", config.replicas),
        DeployStrategy::BlueGreen => {
            format!("Start {} new instances alongside the old, then switch", config.replicas)
        }
    };

    let steps = [
        ("prepare", format!("Create {}", target.display())),
        (
            "materialize",
            format!("Write {} artifact files", generation.artifact.files.len()),
        ),
        ("rollout", rollout),
        ("health_check", format!("GET {}", health_check_path)),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (name, description))| DeploymentStep {
        order: i as u32 + 1,
        name: name.to_string(),
        description,
    })
    .collect();

    DeploymentPlan {
        environment,
        replicas: config.replicas,
        strategy: config.strategy,
        health_check_path,
        target: target.to_string_lossy().into_owned(),
        env: config.env.clone(),
        steps,
    }
}

/// Writes the package to `<output_root>/<environment>/<slug>`
pub struct LocalDeployer {
    output_root: PathBuf,
}

impl LocalDeployer {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }
}

#[async_trait]
impl Deployer for LocalDeployer {
    async fn deploy(
        &self,
        plan: &DeploymentPlan,
        agent: &GeneratedAgent,
        ctx: &StageContext,
    ) -> Result<DeploymentReceipt> {
        let target = PathBuf::from(&plan.target);
        if !target.starts_with(&self.output_root) {
            bail!(
                "plan target {} is outside the output root {}",
                target.display(),
                self.output_root.display()
            );
        }

        let mut receipt = DeploymentReceipt {
            location: plan.target.clone(),
            ..Default::default()
        };

        tokio::fs::create_dir_all(&target)
            .await
            .with_context(|| format!("Failed to create {}", target.display()))?;
        receipt.completed_steps.push("prepare".to_string());

        for file in &agent.files {
            if !is_safe_relative(&file.path) {
                bail!("refusing to write unsafe path '{}'", file.path);
            }
            let path = target.join(&file.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &file.contents)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            receipt.files_written.push(file.path.clone());
            receipt.bytes_written += file.contents.len() as u64;
        }

        let plan_json = serde_json::to_string_pretty(plan)?;
        tokio::fs::write(target.join(PLAN_FILE), plan_json)
            .await
            .context("Failed to write deployment plan")?;
        receipt.completed_steps.push("materialize".to_string());
        receipt.completed_steps.push("rollout".to_string());

        tracing::info!(
            request_id = %ctx.request_id,
            location = %receipt.location,
            files = receipt.files_written.len(),
            "Agent materialized"
        );
        Ok(receipt)
    }

    async fn verify(
        &self,
        plan: &DeploymentPlan,
        agent: &GeneratedAgent,
        receipt: &DeploymentReceipt,
    ) -> Result<PostDeployReport> {
        let target = PathBuf::from(&receipt.location);
        let mut checks = Vec::new();

        let mut mismatched = Vec::new();
        for file in &agent.files {
            match tokio::fs::metadata(target.join(&file.path)).await {
                Ok(meta) if meta.len() == file.contents.len() as u64 => {}
                _ => mismatched.push(file.path.clone()),
            }
        }
        checks.push(if mismatched.is_empty() {
            ValidationCheck::pass("files_present", format!("{} files", agent.files.len()))
        } else {
            ValidationCheck::fail("files_present", format!("missing or changed: {}", mismatched.join(", ")))
        });

        checks.push(match tokio::fs::read_to_string(target.join(PLAN_FILE)).await {
            Ok(raw) => match serde_json::from_str::<DeploymentPlan>(&raw) {
                Ok(written) if &written == plan => ValidationCheck::pass("plan_recorded", PLAN_FILE),
                Ok(_) => ValidationCheck::fail("plan_recorded", "recorded plan differs"),
                Err(e) => ValidationCheck::fail("plan_recorded", format!("unreadable plan: {}", e)),
            },
            Err(e) => ValidationCheck::fail("plan_recorded", format!("{}: {}", PLAN_FILE, e)),
        });

        checks.push(if receipt.files_written.len() == agent.files.len() {
            ValidationCheck::pass("receipt_complete", "all files reported")
        } else {
            ValidationCheck::fail(
                "receipt_complete",
                format!(
                    "{} of {} files reported",
                    receipt.files_written.len(),
                    agent.files.len()
                ),
            )
        });

        Ok(PostDeployReport::from_checks(checks))
    }
}
