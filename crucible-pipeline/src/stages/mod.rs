mod conditional;
mod crafter;
mod planning;
mod registration;
mod verification;

pub use conditional::ConditionalStage;
pub use crafter::CrafterExecutionStage;
pub use planning::PlanningStage;
pub use registration::TaskRegistrationStage;
pub use verification::GateVerificationStage;
