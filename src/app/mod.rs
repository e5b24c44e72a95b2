mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod supervisor;
mod types;


pub use orchestrator::{Backends, OndemandOrchestrator};
pub use types::{ComponentState, ShutdownReason};
