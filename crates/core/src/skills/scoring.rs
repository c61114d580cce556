//! # Scoring Strategies
//!
//! Feasibility, strategic value and quality scores are pluggable. The
//! orchestrator clamps whatever a strategy returns into range.

use super::artifact_registry::{Concept, ValidationReport};
use crate::config::ScoringConfig;

pub trait ScoringStrategy: Send + Sync {
    /// Feasibility of a concept, in [0, 1]
    fn feasibility(&self, concept: &Concept) -> f64;
    /// Strategic value of a concept, in [0, 10]
    fn strategic_value(&self, concept: &Concept) -> f64;
    /// Quality of a generated artifact from its validation report, in [0, 1]
    fn quality(&self, report: &ValidationReport) -> f64;
}

/// Configured constants for concept scores; quality is the check pass ratio.
#[derive(Debug, Clone)]
pub struct BaselineScoring {
    feasibility: f64,
    strategic_value: f64,
}

impl BaselineScoring {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            feasibility: config.feasibility,
            strategic_value: config.strategic_value,
        }
    }
}

impl Default for BaselineScoring {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}

impl ScoringStrategy for BaselineScoring {
    fn feasibility(&self, _concept: &Concept) -> f64 {
        self.feasibility
    }

    fn strategic_value(&self, _concept: &Concept) -> f64 {
        self.strategic_value
    }

    fn quality(&self, report: &ValidationReport) -> f64 {
        if report.checks.is_empty() {
            return 0.0;
        }
        report.passed_count() as f64 / report.checks.len() as f64
    }
}

/// Clamp into `[min, max]`; NaN becomes `min`
pub fn clamp_score(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}
