use super::step::timed_step;
use super::types::SessionSnapshot;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Outcome};
use crate::events::EventBus;
use crate::lifecycle::{Component, ComponentLifecycle};
use crate::sequence::{SequenceKind, TaskSequence};
use crate::task::Task;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

/// Demo call session. Each startup and shutdown step waits on the tokio
/// runtime before completing, the way a signalling round-trip would.
pub struct Session {
    lifecycle: ComponentLifecycle,
    dispatcher: Dispatcher,
    runtime: Handle,
    step_delay: Duration,
    fail_startup: bool,
    steps_completed: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl Session {
    pub fn new(
        name: &str,
        dispatcher: Dispatcher,
        event_bus: EventBus,
        runtime: Handle,
        step_delay: Duration,
        fail_startup: bool,
    ) -> Arc<Self> {
        let lifecycle = ComponentLifecycle::builder(name)
            .dispatcher(dispatcher.clone())
            .event_bus(event_bus)
            .build();
        Arc::new(Self {
            lifecycle,
            dispatcher,
            runtime,
            step_delay,
            fail_startup,
            steps_completed: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.lifecycle.name()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            name: self.name().to_string(),
            state: self.lifecycle.state(),
            startup_attempts: self.lifecycle.startup_attempts(),
            steps_completed: self.steps_completed.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }

    fn step(self: &Arc<Self>, name: &str, fail: bool) -> Arc<Task> {
        let session = Arc::clone(self);
        timed_step(
            format!("{} {}", self.name(), name),
            &self.dispatcher,
            &self.runtime,
            self.step_delay,
            fail,
            move || {
                session.steps_completed.fetch_add(1, Ordering::Relaxed);
            },
        )
    }

    fn run_sequence(
        self: &Arc<Self>,
        sequence: Arc<TaskSequence>,
        steps: Vec<Arc<Task>>,
        resolve: fn(&ComponentLifecycle, Outcome) -> bool,
    ) {
        let added = steps
            .into_iter()
            .try_for_each(|step| sequence.add_task(step));
        let handle = match added.and_then(|_| sequence.start()) {
            Ok(handle) => handle,
            Err(error) => {
                self.record(&Err(error.clone()));
                resolve(&self.lifecycle, Err(error));
                return;
            }
        };

        let session = Arc::clone(self);
        handle.on_complete(move |handle| {
            let outcome = handle
                .outcome()
                .unwrap_or_else(|| Err(EngineError::operation(session.name(), "no outcome")));
            session.record(&outcome);
            resolve(&session.lifecycle, outcome);
        });
    }

    fn record(&self, outcome: &Outcome) {
        if let Err(error) = outcome {
            *self.last_error.lock() = Some(error.to_string());
        }
    }
}

impl Component for Session {
    fn lifecycle(&self) -> &ComponentLifecycle {
        &self.lifecycle
    }

    fn startup_core(self: Arc<Self>) {
        info!("Establishing session '{}'", self.name());
        let sequence = TaskSequence::builder(format!("{} startup", self.name()), SequenceKind::Serial)
            .dispatcher(self.dispatcher.clone())
            .cancel_when_terminating(self.lifecycle.clone())
            .build();
        let steps = vec![
            self.step("allocate media", false),
            self.step("establish dialog", self.fail_startup),
            self.step("activate", false),
        ];
        self.run_sequence(sequence, steps, ComponentLifecycle::complete_startup);
    }

    fn shutdown_core(self: Arc<Self>) {
        info!("Terminating session '{}'", self.name());
        let sequence =
            TaskSequence::builder(format!("{} shutdown", self.name()), SequenceKind::Serial)
                .dispatcher(self.dispatcher.clone())
                .build();
        let steps = vec![
            self.step("terminate dialog", false),
            self.step("release media", false),
        ];
        self.run_sequence(sequence, steps, ComponentLifecycle::complete_shutdown);
    }
}
