//! # Foundry Core
//!
//! The pipeline engine of Foundry - drives agent-creation requests through
//! the Conceptualize → Generate → Validate → Deploy stages, with research
//! augmentation consulted before each major stage.
//!
//! ## Architecture
//!
//! - `config` - Agent profile, stage timeouts, research/scoring/deploy settings
//! - `error` - Typed pipeline errors surfaced to callers
//! - `research/` - Best-effort research augmentation and research services
//! - `skills/` - Stage capabilities (Conceptualizer, Generator, Validator, Deployer)
//! - `state/` - Request records and the in-memory request registry
//! - `swarm/` - Pipeline orchestrator, lifecycle, events, status reporting
//!
//! ## Usage
//!
//! ```rust,ignore
//! use foundry_core::config::FoundryConfig;
//! use foundry_core::state::CreationRequest;
//! use foundry_core::swarm::{CancelToken, PipelineOrchestrator};
//!
//! let orchestrator = PipelineOrchestrator::from_config(&FoundryConfig::default())?;
//! let cancel = CancelToken::new();
//! let concept = orchestrator
//!     .conceptualize(CreationRequest::new("pricing-bot", "finance"), &cancel)
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod research;
pub mod skills;
pub mod state;
pub mod swarm;

pub use error::{PipelineError, PipelineResult};
