pub mod builder;
pub mod engine;
pub mod router;
pub mod types;
pub mod update;

pub use builder::OrchestratorBuilder;
pub use engine::Orchestrator;
pub use router::{next_step, RejectPolicy, WorkflowPolicy, DEFAULT_MAX_RETRIES, DEFAULT_MAX_REVIEW_ROUNDS};
pub use types::*;
pub use update::{merge, replay, StateUpdate};
