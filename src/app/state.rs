use super::types::{DispatcherSnapshot, RunSnapshot};
use super::EngineOrchestrator;
use crate::lifecycle::{Component, ComponentState};

impl EngineOrchestrator {
    /// Current state of the endpoint
    pub fn endpoint_state(&self) -> ComponentState {
        self.endpoint.lifecycle().state()
    }

    /// Endpoint, sessions and dispatcher counters, tagged with `exit_code`.
    pub fn snapshot(&self, exit_code: i32) -> RunSnapshot {
        RunSnapshot {
            endpoint: self.endpoint.snapshot(),
            dispatcher: DispatcherSnapshot::new(
                self.dispatcher.worker_count(),
                self.dispatcher.stats(),
            ),
            exit_code,
        }
    }
}
