//! # Foundry Configuration
//!
//! Runtime settings for a pipeline orchestrator. Every field has a default so
//! a partial `.foundry/config.json` is enough; environment variables override
//! the file for deployment-specific values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::research::ResearchPolicy;
use crate::swarm::pipeline::Stage;

/// Identity reported to the status sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentProfile {
    /// Stable key, e.g. `agent-creator`
    pub key: String,
    /// Human-readable name for status displays
    pub display_name: String,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            key: "agent-creator".to_string(),
            display_name: "Agent Creator".to_string(),
        }
    }
}

/// Per-stage time limits, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageTimeouts {
    pub conceptualize_ms: u64,
    pub generate_ms: u64,
    pub validate_ms: u64,
    pub deploy_ms: u64,
    pub research_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            conceptualize_ms: 30_000,
            generate_ms: 120_000,
            validate_ms: 60_000,
            deploy_ms: 300_000,
            research_ms: 10_000,
        }
    }
}

impl StageTimeouts {
    /// Same limit for every stage (handy in tests)
    pub fn uniform(ms: u64) -> Self {
        Self {
            conceptualize_ms: ms,
            generate_ms: ms,
            validate_ms: ms,
            deploy_ms: ms,
            research_ms: ms,
        }
    }

    pub fn for_stage(&self, stage: Stage) -> Duration {
        let ms = match stage {
            Stage::Conceptualize => self.conceptualize_ms,
            Stage::Generate => self.generate_ms,
            Stage::Validate => self.validate_ms,
            Stage::Deploy => self.deploy_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn research(&self) -> Duration {
        Duration::from_millis(self.research_ms)
    }
}

/// Research augmentation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResearchConfig {
    pub policy: ResearchPolicy,
    /// SearXNG-compatible search endpoint; research is skipped when unset
    pub searxng_url: Option<String>,
    /// Maximum findings attached to a stage
    pub max_results: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            policy: ResearchPolicy::BestEffort,
            searxng_url: None,
            max_results: 5,
        }
    }
}

/// Constants for the baseline scoring strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Feasibility reported for every concept, in [0, 1]
    pub feasibility: f64,
    /// Strategic value reported for every concept, in [0, 10]
    pub strategic_value: f64,
    /// Deployments are refused below this quality score
    pub min_quality_for_deploy: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            feasibility: 0.85,
            strategic_value: 8.0,
            min_quality_for_deploy: 0.5,
        }
    }
}

/// Deployment target settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeployConfig {
    /// Root directory generated agents are materialized under
    pub output_root: PathBuf,
    pub allowed_environments: Vec<String>,
    pub max_replicas: u32,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from(".foundry/deployments"),
            allowed_environments: vec![
                "development".to_string(),
                "staging".to_string(),
                "production".to_string(),
            ],
            max_replicas: 16,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct FoundryConfig {
    pub agent: AgentProfile,
    pub timeouts: StageTimeouts,
    pub research: ResearchConfig,
    pub scoring: ScoringConfig,
    pub deploy: DeployConfig,
}

impl FoundryConfig {
    /// Location of the config file (`FOUNDRY_CONFIG` overrides the default)
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FOUNDRY_CONFIG") {
            return PathBuf::from(path);
        }
        PathBuf::from(".foundry/config.json")
    }

    /// Load from the default location, then apply environment overrides
    pub async fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()).await?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from a specific file; a missing file yields the defaults
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config: {:?}", path));
            }
        };
        serde_json::from_str(&content).with_context(|| format!("Invalid config: {:?}", path))
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config: {:?}", path))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FOUNDRY_SEARXNG_URL") {
            if !url.trim().is_empty() {
                self.research.searxng_url = Some(url);
            }
        }
        if let Ok(root) = std::env::var("FOUNDRY_OUTPUT_ROOT") {
            if !root.trim().is_empty() {
                self.deploy.output_root = PathBuf::from(root);
            }
        }
    }
}
