use super::session::Session;
use super::step::timed_step;
use super::types::EndpointSnapshot;
use crate::completion::CompletionHandle;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Outcome};
use crate::events::EventBus;
use crate::lifecycle::{
    shutdown_task, startup_task, Component, ComponentExt, ComponentLifecycle, ComponentRegistry,
    ComponentState,
};
use crate::sequence::{SequenceKind, TaskSequence};
use crate::task::Task;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Demo endpoint that owns a set of sessions.
///
/// Startup binds the transport, brings every registered session up in
/// parallel (a session failing to start does not fail the endpoint) and then
/// publishes presence. Shutdown tears sessions and transport down in
/// parallel. Cancelling `startup_cancel` abandons an in-flight startup.
pub struct Endpoint {
    lifecycle: ComponentLifecycle,
    dispatcher: Dispatcher,
    event_bus: EventBus,
    runtime: Handle,
    step_delay: Duration,
    startup_cancel: CancellationToken,
    sessions: ComponentRegistry<Session>,
}

impl Endpoint {
    pub fn new(
        name: &str,
        dispatcher: Dispatcher,
        event_bus: EventBus,
        runtime: Handle,
        step_delay: Duration,
        startup_cancel: CancellationToken,
    ) -> Arc<Self> {
        let lifecycle = ComponentLifecycle::builder(name)
            .dispatcher(dispatcher.clone())
            .event_bus(event_bus.clone())
            .build();
        Arc::new(Self {
            lifecycle,
            sessions: ComponentRegistry::new(format!("{} sessions", name)),
            dispatcher,
            event_bus,
            runtime,
            step_delay,
            startup_cancel,
        })
    }

    pub fn name(&self) -> &str {
        self.lifecycle.name()
    }

    /// Register a session, or take another reference to an existing one.
    pub fn open_session(&self, key: &str, fail_startup: bool) -> Arc<Session> {
        let (session, created) = self.sessions.acquire(key, || {
            Session::new(
                key,
                self.dispatcher.clone(),
                self.event_bus.clone(),
                self.runtime.clone(),
                self.step_delay,
                fail_startup,
            )
        });
        if created && self.lifecycle.state() == ComponentState::Started {
            // Sessions opened on a running endpoint start right away.
            if let Err(e) = session.begin_startup() {
                warn!("Session '{}' could not start: {}", key, e);
            }
        }
        session
    }

    /// Drop a reference to a session. The last release shuts it down and
    /// returns the shutdown handle.
    pub fn close_session(&self, key: &str) -> Option<CompletionHandle> {
        let session = self.sessions.release(key)?;
        info!("Closing session '{}'", key);
        Some(session.begin_shutdown())
    }

    pub fn session(&self, key: &str) -> Option<Arc<Session>> {
        self.sessions.get(key)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            name: self.name().to_string(),
            state: self.lifecycle.state(),
            sessions: self
                .sessions
                .snapshot()
                .into_iter()
                .map(|(_, session)| session.snapshot())
                .collect(),
        }
    }

    fn step(&self, name: &str) -> Arc<Task> {
        timed_step(
            format!("{} {}", self.name(), name),
            &self.dispatcher,
            &self.runtime,
            self.step_delay,
            false,
            || {},
        )
    }

    fn sequence(&self, suffix: &str, kind: SequenceKind) -> Arc<TaskSequence> {
        TaskSequence::builder(format!("{} {}", self.name(), suffix), kind)
            .dispatcher(self.dispatcher.clone())
            .event_bus(self.event_bus.clone())
            .build()
    }

    fn build_startup(&self) -> Result<Arc<TaskSequence>, EngineError> {
        let children = self.sequence("session startup", SequenceKind::Parallel);
        for (_, session) in self.sessions.snapshot() {
            children.add_task(startup_task(&session, true))?;
        }

        let startup = TaskSequence::builder(format!("{} startup", self.name()), SequenceKind::Serial)
            .dispatcher(self.dispatcher.clone())
            .event_bus(self.event_bus.clone())
            .cancel_when_terminating(self.lifecycle.clone())
            .cancel_on(self.startup_cancel.clone())
            .build();
        startup.add_task(self.step("bind transport"))?;
        startup.add_task(children.into_task(false))?;
        startup.add_task(self.step("publish presence"))?;
        Ok(startup)
    }

    fn build_shutdown(&self) -> Result<Arc<TaskSequence>, EngineError> {
        let shutdown = self.sequence("shutdown", SequenceKind::Parallel);
        for (_, session) in self.sessions.snapshot() {
            shutdown.add_task(shutdown_task(&session, true))?;
        }
        shutdown.add_task(self.step("unbind transport"))?;
        Ok(shutdown)
    }

    fn resolve_when_done(
        self: &Arc<Self>,
        built: Result<Arc<TaskSequence>, EngineError>,
        resolve: fn(&ComponentLifecycle, Outcome) -> bool,
    ) {
        match built.and_then(|sequence| sequence.start()) {
            Ok(handle) => {
                let endpoint = Arc::clone(self);
                handle.on_complete(move |handle| {
                    let outcome = handle.outcome().unwrap_or_else(|| {
                        Err(EngineError::operation(endpoint.name(), "no outcome"))
                    });
                    resolve(&endpoint.lifecycle, outcome);
                });
            }
            Err(error) => {
                resolve(&self.lifecycle, Err(error));
            }
        }
    }
}

impl Component for Endpoint {
    fn lifecycle(&self) -> &ComponentLifecycle {
        &self.lifecycle
    }

    fn startup_core(self: Arc<Self>) {
        info!(
            "Starting endpoint '{}' with {} sessions",
            self.name(),
            self.sessions.len()
        );
        let built = self.build_startup();
        self.resolve_when_done(built, ComponentLifecycle::complete_startup);
    }

    fn shutdown_core(self: Arc<Self>) {
        info!("Shutting down endpoint '{}'", self.name());
        let built = self.build_shutdown();
        self.resolve_when_done(built, ComponentLifecycle::complete_shutdown);
    }
}
