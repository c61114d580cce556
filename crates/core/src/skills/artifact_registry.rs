//! # Stage Artifacts
//!
//! Payload types passed between stages and stored on stage results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Conceptualize
// ============================================================================

/// One planned component of the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentSpec {
    pub name: String,
    pub responsibility: String,
}

/// The agent concept produced from requirements
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Concept {
    pub name: String,
    /// Kebab-case identifier derived from the name
    pub slug: String,
    pub domain: String,
    pub summary: String,
    pub capabilities: Vec<String>,
    pub components: Vec<ComponentSpec>,
    pub risks: Vec<String>,
    #[serde(default)]
    pub research_notes: Vec<String>,
}

// ============================================================================
// Generate
// ============================================================================

fn default_include_tests() -> bool {
    true
}

/// Caller options for the Generate stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GenerationOptions {
    /// Emit a test file alongside the agent module
    #[serde(default = "default_include_tests")]
    pub include_tests: bool,
    /// Author recorded in the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Version recorded in the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            include_tests: default_include_tests(),
            author: None,
            version: None,
        }
    }
}

/// One generated file, path relative to the agent root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedFile {
    pub path: String,
    pub contents: String,
}

/// The generated agent artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedAgent {
    pub name: String,
    pub slug: String,
    pub manifest: serde_json::Value,
    pub files: Vec<GeneratedFile>,
}

impl GeneratedAgent {
    pub fn file(&self, path: &str) -> Option<&GeneratedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.contents.len() as u64).sum()
    }
}

// ============================================================================
// Validate
// ============================================================================

/// One named check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl ValidationCheck {
    pub fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Outcome of the validation sub-step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
    pub passed: bool,
}

impl ValidationReport {
    pub fn from_checks(checks: Vec<ValidationCheck>) -> Self {
        let passed = !checks.is_empty() && checks.iter().all(|c| c.passed);
        Self { checks, passed }
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failures(&self) -> Vec<&ValidationCheck> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }
}

// ============================================================================
// Deploy
// ============================================================================

/// Rollout strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeployStrategy {
    #[default]
    Rolling,
    Recreate,
    BlueGreen,
}

impl fmt::Display for DeployStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rolling => "rolling",
            Self::Recreate => "recreate",
            Self::BlueGreen => "blue-green",
        })
    }
}

fn default_replicas() -> u32 {
    1
}

/// Caller configuration for the Deploy stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DeploymentConfig {
    /// Target environment, e.g. `staging`
    pub environment: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub strategy: DeployStrategy,
    /// Defaults to `/health`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
    /// Environment variables for the deployed agent
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl DeploymentConfig {
    pub fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            replicas: default_replicas(),
            strategy: DeployStrategy::default(),
            health_check_path: None,
            env: BTreeMap::new(),
        }
    }
}

/// One step of the deployment pipeline descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentStep {
    pub order: u32,
    pub name: String,
    pub description: String,
}

/// Deployment pipeline descriptor built from config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentPlan {
    pub environment: String,
    pub replicas: u32,
    pub strategy: DeployStrategy,
    pub health_check_path: String,
    /// Directory the artifact is materialized into
    pub target: String,
    pub env: BTreeMap<String, String>,
    pub steps: Vec<DeploymentStep>,
}

/// What the deployer did
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeploymentReceipt {
    pub location: String,
    pub files_written: Vec<String>,
    pub bytes_written: u64,
    pub completed_steps: Vec<String>,
}

/// Post-deployment verification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostDeployReport {
    pub checks: Vec<ValidationCheck>,
    pub healthy: bool,
}

impl PostDeployReport {
    pub fn from_checks(checks: Vec<ValidationCheck>) -> Self {
        let healthy = checks.iter().all(|c| c.passed);
        Self { checks, healthy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let options: GenerationOptions = serde_json::from_str("{}").unwrap();
        assert!(options.include_tests);
        assert_eq!(options, GenerationOptions::default());
    }

    #[test]
    fn test_deployment_config_defaults() {
        let config: DeploymentConfig =
            serde_json::from_str(r#"{"environment": "staging"}"#).unwrap();
        assert_eq!(config, DeploymentConfig::new("staging"));
        assert_eq!(config.strategy.to_string(), "rolling");
    }

    #[test]
    fn test_empty_report_does_not_pass() {
        assert!(!ValidationReport::from_checks(Vec::new()).passed);

        let report = ValidationReport::from_checks(vec![
            ValidationCheck::pass("a", ""),
            ValidationCheck::fail("b", "missing"),
        ]);
        assert!(!report.passed);
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failures()[0].name, "b");
    }
}
