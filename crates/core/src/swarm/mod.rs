//! # Pipeline Orchestration
//!
//! Drives agent-creation requests through the stage pipeline.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Requirements → Conceptualize → Generate (+ Validate) → Deploy (+ Verify)
//!                      ▲               ▲                    ▲
//!                      └──── research consulted before each ┘
//! ```

pub mod cancel;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod status;

pub use cancel::CancelToken;
pub use events::{PipelineEvent, PipelineEventKind};
pub use orchestrator::{PipelineOrchestrator, PipelineRun};
pub use pipeline::{PipelineStatus, Stage};
pub use status::{
    AgentActivity, AgentStatusSnapshot, ChannelStatusSink, StageCounts, StatusReporter,
    StatusSink, StatusUpdate, TracingStatusSink,
};
