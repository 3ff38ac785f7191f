//! Adapters that run child lifecycle operations as sequence tasks.

use super::{Component, ComponentExt};
use crate::task::Task;
use std::sync::Arc;

/// Task that starts `component` and completes with its startup outcome.
pub fn startup_task<C: Component>(component: &Arc<C>, optional: bool) -> Arc<Task> {
    let component = Arc::clone(component);
    Task::builder(format!("start {}", component.lifecycle().name()))
        .optional(optional)
        .dispatcher(component.lifecycle().dispatcher().clone())
        .build(move |task| {
            let handle = component.begin_startup()?;
            task.complete_when(&handle);
            Ok(())
        })
}

/// Task that shuts `component` down and completes with its shutdown outcome.
pub fn shutdown_task<C: Component>(component: &Arc<C>, optional: bool) -> Arc<Task> {
    let component = Arc::clone(component);
    Task::builder(format!("shutdown {}", component.lifecycle().name()))
        .optional(optional)
        .dispatcher(component.lifecycle().dispatcher().clone())
        .build(move |task| {
            let handle = component.begin_shutdown();
            task.complete_when(&handle);
            Ok(())
        })
}
