use crate::dispatcher::DispatcherStatsSnapshot;
use crate::lifecycle::ComponentState;
use serde::Serialize;
use std::fmt;

/// Why the runner is shutting down
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(signal) => write!(f, "signal {}", signal),
            ShutdownReason::Error(message) => write!(f, "error: {}", message),
            ShutdownReason::UserRequest => f.write_str("user request"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub name: String,
    pub state: ComponentState,
    pub startup_attempts: u32,
    pub steps_completed: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub state: ComponentState,
    pub sessions: Vec<SessionSnapshot>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DispatcherSnapshot {
    pub workers: usize,
    pub jobs_posted: u64,
    pub jobs_executed: u64,
    pub jobs_panicked: u64,
}

impl DispatcherSnapshot {
    pub fn new(workers: usize, stats: DispatcherStatsSnapshot) -> Self {
        Self {
            workers,
            jobs_posted: stats.jobs_posted,
            jobs_executed: stats.jobs_executed,
            jobs_panicked: stats.jobs_panicked,
        }
    }
}

/// Final report printed by the runner
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub endpoint: EndpointSnapshot,
    pub dispatcher: DispatcherSnapshot,
    pub exit_code: i32,
}
