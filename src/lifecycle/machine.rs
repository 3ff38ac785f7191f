use super::ComponentState;
use crate::completion::CompletionHandle;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Outcome};
use crate::events::{EventBus, LifecycleEvent};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Deferred shutdown logic replayed once startup resolves.
pub type ShutdownReplay = Box<dyn FnOnce() + Send + 'static>;

/// What the caller of [`ComponentLifecycle::request_shutdown`] must do next.
#[derive(Debug)]
pub enum ShutdownRequest {
    /// This caller moved the component to Terminating and must run the
    /// shutdown logic.
    Invoke(CompletionHandle),
    /// Another operation is in flight; the handle resolves with it.
    Queued(CompletionHandle),
    /// Already terminated.
    Satisfied(CompletionHandle),
}

impl ShutdownRequest {
    pub fn handle(&self) -> &CompletionHandle {
        match self {
            ShutdownRequest::Invoke(h)
            | ShutdownRequest::Queued(h)
            | ShutdownRequest::Satisfied(h) => h,
        }
    }
}

/// Start/stop state machine owned by a component.
///
/// Clones share the same state. All fields sit behind one private mutex that
/// is never held while callbacks, replays or component hooks run.
#[derive(Clone)]
pub struct ComponentLifecycle {
    shared: Arc<LifecycleShared>,
}

struct LifecycleShared {
    name: String,
    dispatcher: Dispatcher,
    event_bus: Option<EventBus>,
    inner: Mutex<LifecycleInner>,
}

struct LifecycleInner {
    state: ComponentState,
    startup: Option<CompletionHandle>,
    shutdown_waiters: Vec<CompletionHandle>,
    deferred_shutdown: Option<ShutdownReplay>,
    startup_attempts: u32,
}

impl ComponentLifecycle {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self::with_parts(name.into(), Dispatcher::global(), None)
    }

    pub fn builder<S: Into<String>>(name: S) -> ComponentLifecycleBuilder {
        ComponentLifecycleBuilder {
            name: name.into(),
            dispatcher: None,
            event_bus: None,
        }
    }

    fn with_parts(name: String, dispatcher: Dispatcher, event_bus: Option<EventBus>) -> Self {
        Self {
            shared: Arc::new(LifecycleShared {
                name,
                dispatcher,
                event_bus,
                inner: Mutex::new(LifecycleInner {
                    state: ComponentState::Idle,
                    startup: None,
                    shutdown_waiters: Vec::new(),
                    deferred_shutdown: None,
                    startup_attempts: 0,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.shared.event_bus.as_ref()
    }

    pub fn state(&self) -> ComponentState {
        self.shared.inner.lock().state
    }

    /// Terminating or Terminated; callers should not issue new work.
    pub fn is_shutting_down(&self) -> bool {
        self.state().is_shutting_down()
    }

    /// Number of times startup has been attempted.
    pub fn startup_attempts(&self) -> u32 {
        self.shared.inner.lock().startup_attempts
    }

    /// Shutdown callers currently waiting on this component.
    pub fn pending_shutdown_waiters(&self) -> usize {
        self.shared.inner.lock().shutdown_waiters.len()
    }

    /// Move Idle -> Starting. The caller must then run the startup logic,
    /// which eventually calls [`ComponentLifecycle::complete_startup`].
    pub fn request_startup(&self) -> Result<CompletionHandle, EngineError> {
        let handle = {
            let mut inner = self.shared.inner.lock();
            if inner.state != ComponentState::Idle {
                warn!(
                    "Rejecting start of '{}' in state {}",
                    self.shared.name, inner.state
                );
                return Err(EngineError::invalid_state(
                    self.shared.name.as_str(),
                    "start",
                    inner.state,
                ));
            }
            inner.state = ComponentState::Starting;
            inner.startup_attempts += 1;
            let handle = CompletionHandle::on_dispatcher(self.shared.dispatcher.clone());
            inner.startup = Some(handle.clone());
            handle
        };

        info!("Starting component '{}'", self.shared.name);
        self.publish(ComponentState::Idle, ComponentState::Starting);
        Ok(handle)
    }

    /// Register a shutdown request.
    ///
    /// `replay` runs the component's shutdown logic; it is kept only when the
    /// request has to wait for startup to resolve.
    pub fn request_shutdown(&self, replay: ShutdownReplay) -> ShutdownRequest {
        let (from, handle) = {
            let mut inner = self.shared.inner.lock();
            let from = inner.state;
            if from == ComponentState::Terminated {
                debug!("Component '{}' already terminated", self.shared.name);
                return ShutdownRequest::Satisfied(CompletionHandle::completed_on(
                    self.shared.dispatcher.clone(),
                    Ok(()),
                ));
            }

            let handle = CompletionHandle::on_dispatcher(self.shared.dispatcher.clone());
            inner.shutdown_waiters.push(handle.clone());
            match from {
                ComponentState::Terminating => {
                    debug!(
                        "Queued shutdown of '{}' behind in-flight shutdown ({} waiters)",
                        self.shared.name,
                        inner.shutdown_waiters.len()
                    );
                    return ShutdownRequest::Queued(handle);
                }
                ComponentState::Starting => {
                    if inner.deferred_shutdown.is_none() {
                        inner.deferred_shutdown = Some(replay);
                    }
                    info!(
                        "Deferring shutdown of '{}' until startup resolves",
                        self.shared.name
                    );
                    return ShutdownRequest::Queued(handle);
                }
                _ => {
                    inner.state = ComponentState::Terminating;
                }
            }
            (from, handle)
        };

        info!("Shutting down component '{}'", self.shared.name);
        self.publish(from, ComponentState::Terminating);
        ShutdownRequest::Invoke(handle)
    }

    /// Resolve Starting. Success moves to Started, failure rolls back to Idle.
    /// A shutdown deferred during startup is released afterwards.
    ///
    /// Returns false, doing nothing, when no startup is pending.
    pub fn complete_startup(&self, outcome: Outcome) -> bool {
        let (handle, resolved, replay) = {
            let mut inner = self.shared.inner.lock();
            let Some(handle) = inner.startup.take() else {
                warn!(
                    "complete_startup on '{}' with no pending startup (state {}), ignoring",
                    self.shared.name, inner.state
                );
                return false;
            };

            let resolved = if outcome.is_ok() {
                ComponentState::Started
            } else {
                ComponentState::Idle
            };
            inner.state = resolved;

            let replay = inner.deferred_shutdown.take();
            if replay.is_some() {
                inner.state = ComponentState::Terminating;
            }
            (handle, resolved, replay)
        };

        match &outcome {
            Ok(()) => info!("Component '{}' started", self.shared.name),
            Err(e) => error!("Component '{}' failed to start: {}", self.shared.name, e),
        }
        self.publish(ComponentState::Starting, resolved);

        handle.complete(outcome, false);

        if let Some(replay) = replay {
            info!(
                "Replaying deferred shutdown of '{}'",
                self.shared.name
            );
            self.publish(resolved, ComponentState::Terminating);
            self.shared.dispatcher.post(replay);
        }
        true
    }

    /// Resolve Terminating -> Terminated and release every shutdown waiter
    /// with the same outcome. A failed shutdown still terminates.
    ///
    /// Returns false, doing nothing, when no shutdown is in progress.
    pub fn complete_shutdown(&self, outcome: Outcome) -> bool {
        let waiters = {
            let mut inner = self.shared.inner.lock();
            if inner.state != ComponentState::Terminating {
                warn!(
                    "complete_shutdown on '{}' in state {}, ignoring",
                    self.shared.name, inner.state
                );
                return false;
            }
            inner.state = ComponentState::Terminated;
            std::mem::take(&mut inner.shutdown_waiters)
        };

        match &outcome {
            Ok(()) => info!("Component '{}' terminated", self.shared.name),
            Err(e) => error!(
                "Component '{}' terminated with error: {}",
                self.shared.name, e
            ),
        }
        self.publish(ComponentState::Terminating, ComponentState::Terminated);

        debug!(
            "Releasing {} shutdown waiters of '{}'",
            waiters.len(),
            self.shared.name
        );
        for waiter in waiters {
            waiter.complete(outcome.clone(), false);
        }
        true
    }

    fn publish(&self, from: ComponentState, to: ComponentState) {
        debug!("Component '{}' state changed: {} -> {}", self.shared.name, from, to);
        if let Some(bus) = &self.shared.event_bus {
            bus.publish(LifecycleEvent::state_changed(&self.shared.name, from, to));
        }
    }
}

impl fmt::Debug for ComponentLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentLifecycle")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`ComponentLifecycle`]
pub struct ComponentLifecycleBuilder {
    name: String,
    dispatcher: Option<Dispatcher>,
    event_bus: Option<EventBus>,
}

impl ComponentLifecycleBuilder {
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Publish every state transition on `event_bus`.
    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> ComponentLifecycle {
        ComponentLifecycle::with_parts(
            self.name,
            self.dispatcher.unwrap_or_else(Dispatcher::global),
            self.event_bus,
        )
    }
}
