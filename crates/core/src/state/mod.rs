pub mod records;
pub mod registry;

pub use records::{
    Conceptualization, CreationRequest, DeploymentResult, FailureRecord, GenerationResult,
    PipelineState, RecordKind, StageResult, StageStatus,
};
pub use registry::{RegistryError, RequestRegistry};
