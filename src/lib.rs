pub mod app;
pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod sequence;
pub mod task;

pub use app::{EngineOrchestrator, RunSnapshot, ShutdownReason};
pub use completion::{CompletionHandle, CompletionState};
pub use config::{DemoConfig, DispatcherConfig, EngineConfig, LifecycleConfig};
pub use dispatcher::{Dispatcher, DispatcherStatsSnapshot};
pub use error::{EngineError, Error, EventBusError, Outcome, Result};
pub use events::{
    stop_handler, EventBus, EventFilter, EventHandler, EventReceiver, LifecycleEvent,
    LoggingHandler,
};
pub use lifecycle::{
    shutdown_task, startup_task, Component, ComponentExt, ComponentLifecycle, ComponentRegistry,
    ComponentState, ShutdownRequest,
};
pub use sequence::{SequenceKind, SequenceState, TaskSequence, TaskSequenceBuilder};
pub use task::{Payload, Task, TaskBuilder, TaskResult};
