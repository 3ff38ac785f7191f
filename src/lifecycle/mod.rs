//! Component start/stop state machine and child management.

mod component;
mod machine;
mod registry;
mod state;
mod tasks;


pub use component::{Component, ComponentExt};
pub use machine::{ComponentLifecycle, ComponentLifecycleBuilder, ShutdownRequest};
pub use registry::ComponentRegistry;
pub use state::ComponentState;
pub use tasks::{shutdown_task, startup_task};
