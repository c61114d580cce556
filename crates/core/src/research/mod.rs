//! # Research Augmentation
//!
//! Best-effort enrichment of stage context via an external knowledge query.
//!
//! ```text
//! Orchestrator ── stage about to run ──▶ ResearchAugmenter ──▶ ResearchService
//!      ▲                                        │                (SearXNG / static / none)
//!      └────────── ResearchRecord ◀─────────────┘
//! ```

pub mod augmenter;
pub mod service;

pub use augmenter::{ResearchAugmenter, ResearchOutcome, ResearchPolicy, ResearchRecord};
pub use service::{
    Finding, NoResearch, ResearchInsights, ResearchService, SearxResearchService, StaticResearch,
};
