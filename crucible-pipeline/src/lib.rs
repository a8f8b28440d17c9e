pub mod context;
pub mod engine;
pub mod event_bridge;
pub mod stage;
pub mod stages;

pub use context::{PipelineContext, PhaseSink};
pub use engine::{DefaultStageRecoveryHandler, PipelineEngine, RecoveryDecision, StageRecoveryHandler};
pub use event_bridge::PipelineEventBus;
pub use stage::{PipelineOutcome, Stage, StageResult};
