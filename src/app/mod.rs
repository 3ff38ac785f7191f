mod endpoint;
mod orchestrator;
mod runtime;
mod session;
mod shutdown;
mod startup;
mod state;
mod step;
mod types;

#[cfg(test)]
mod tests;

pub use endpoint::Endpoint;
pub use orchestrator::EngineOrchestrator;
pub use session::Session;
pub use types::{DispatcherSnapshot, EndpointSnapshot, RunSnapshot, SessionSnapshot, ShutdownReason};
