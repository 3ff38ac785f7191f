use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failures produced and propagated by the engine itself.
///
/// Every variant is `Clone` so a single outcome can be handed to all
/// callers waiting on the same operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// An expected, recognized failure raised by a step or collaborator.
    #[error("Operation failed in {source_name}: {message}")]
    Operation {
        source_name: String,
        message: String,
    },

    /// An operation was requested while the target was in an incompatible state.
    #[error("Invalid state for {operation} on {component}: {state}")]
    InvalidState {
        component: String,
        operation: String,
        state: String,
    },

    /// A bounded wait or collaborator timer expired.
    #[error("Operation {operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Operation {operation} was cancelled")]
    Cancelled { operation: String },
}

impl EngineError {
    pub fn operation<S: Into<String>, M: Into<String>>(source_name: S, message: M) -> Self {
        Self::Operation {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state<S: Into<String>, O: Into<String>, T: fmt::Display>(
        component: S,
        operation: O,
        state: T,
    ) -> Self {
        Self::InvalidState {
            component: component.into(),
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// True for failures a caller may reasonably retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Operation { .. } => true,
            EngineError::Timeout { .. } => true,
            EngineError::InvalidState { .. } => false,
            EngineError::Cancelled { .. } => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Receiver lagged behind by {missed} events")]
    Lagged { missed: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,

    #[error("Event handler task failed: {reason}")]
    HandlerFailed { reason: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("System error: {message}")]
    System { message: String },
}

impl Error {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Outcome of a step, task, sequence or lifecycle operation.
pub type Outcome = std::result::Result<(), EngineError>;

pub type Result<T> = std::result::Result<T, Error>;
