pub mod api;
pub mod config;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod reconcile;
pub mod scheduler;
pub mod sinks;
pub mod sources;
pub mod state;

pub use orchestrator::{Orchestrator, OrchestratorHandle};
pub use pipeline::{DeltaSource, PipelineError};
