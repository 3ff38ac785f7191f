use crate::error::EventBusError;
use crate::lifecycle::ComponentState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Events emitted by components and sequences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LifecycleEvent {
    /// A component moved between lifecycle states
    StateChanged {
        component: String,
        from: ComponentState,
        to: ComponentState,
        at: DateTime<Utc>,
    },
    /// A task sequence reached its terminal state
    SequenceCompleted {
        sequence: String,
        succeeded: bool,
        error: Option<String>,
        at: DateTime<Utc>,
    },
    /// Process-level shutdown was requested
    ShutdownRequested { reason: String, at: DateTime<Utc> },
}

impl LifecycleEvent {
    pub fn state_changed(component: &str, from: ComponentState, to: ComponentState) -> Self {
        LifecycleEvent::StateChanged {
            component: component.to_string(),
            from,
            to,
            at: Utc::now(),
        }
    }

    pub fn sequence_completed(sequence: &str, error: Option<String>) -> Self {
        LifecycleEvent::SequenceCompleted {
            sequence: sequence.to_string(),
            succeeded: error.is_none(),
            error,
            at: Utc::now(),
        }
    }

    pub fn shutdown_requested<S: Into<String>>(reason: S) -> Self {
        LifecycleEvent::ShutdownRequested {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::StateChanged { at, .. } => *at,
            LifecycleEvent::SequenceCompleted { at, .. } => *at,
            LifecycleEvent::ShutdownRequested { at, .. } => *at,
        }
    }

    /// Name of the component or sequence the event concerns
    pub fn source(&self) -> Option<&str> {
        match self {
            LifecycleEvent::StateChanged { component, .. } => Some(component),
            LifecycleEvent::SequenceCompleted { sequence, .. } => Some(sequence),
            LifecycleEvent::ShutdownRequested { .. } => None,
        }
    }

    pub fn description(&self) -> String {
        match self {
            LifecycleEvent::StateChanged {
                component, from, to, ..
            } => format!("{}: {} -> {}", component, from, to),
            LifecycleEvent::SequenceCompleted {
                sequence,
                succeeded: true,
                ..
            } => format!("Sequence {} succeeded", sequence),
            LifecycleEvent::SequenceCompleted {
                sequence, error, ..
            } => format!(
                "Sequence {} failed: {}",
                sequence,
                error.as_deref().unwrap_or("unknown error")
            ),
            LifecycleEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::StateChanged { .. } => "state_changed",
            LifecycleEvent::SequenceCompleted { .. } => "sequence_completed",
            LifecycleEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Broadcast bus for lifecycle events.
///
/// Publishing is synchronous so it can be called while a component resolves
/// a transition; it never blocks.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event; returns the number of subscribers reached.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        debug!("Publishing event: {}", event.description());
        // No subscribers is not an error for lifecycle notifications.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run `handler` on a background task until `shutdown` is cancelled or
    /// the bus closes.
    pub fn spawn_handler<H>(&self, mut handler: H, shutdown: CancellationToken) -> JoinHandle<()>
    where
        H: EventHandler + 'static,
    {
        let mut receiver =
            self.subscribe_filtered(handler.event_filter(), handler.handler_name());
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = receiver.recv() => event,
                };
                match event {
                    Ok(event) => {
                        if let Err(e) = handler.handle_event(event).await {
                            error!("Handler '{}' failed: {}", handler.handler_name(), e);
                        }
                    }
                    Err(EventBusError::Lagged { missed }) => {
                        warn!(
                            "Handler '{}' skipped {} events",
                            handler.handler_name(),
                            missed
                        );
                    }
                    Err(EventBusError::ChannelClosed | EventBusError::HandlerFailed { .. }) => {
                        break
                    }
                }
            }
            debug!("Handler '{}' stopped", handler.handler_name());
        })
    }
}

/// Cancel a handler started by [`EventBus::spawn_handler`] and wait for it.
/// A handler task that panicked or was aborted surfaces as `HandlerFailed`.
pub async fn stop_handler(
    shutdown: &CancellationToken,
    handle: JoinHandle<()>,
) -> Result<(), EventBusError> {
    shutdown.cancel();
    handle.await.map_err(|e| EventBusError::HandlerFailed {
        reason: e.to_string(),
    })
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    /// Events whose source component or sequence is listed
    Components(Vec<String>),
}

impl EventFilter {
    pub fn matches(&self, event: &LifecycleEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Components(components) => event
                .source()
                .map(|source| components.iter().any(|c| c == source))
                .unwrap_or(false),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<LifecycleEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<LifecycleEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<LifecycleEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { missed: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<Option<LifecycleEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { missed: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

/// Consumer of lifecycle events driven by [`EventBus::spawn_handler`]
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&mut self, event: LifecycleEvent) -> Result<(), EventBusError>;

    fn handler_name(&self) -> &str;

    fn event_filter(&self) -> EventFilter {
        EventFilter::All
    }
}

/// Logs every transition at info level
pub struct LoggingHandler {
    name: String,
}

impl LoggingHandler {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle_event(&mut self, event: LifecycleEvent) -> Result<(), EventBusError> {
        match &event {
            LifecycleEvent::SequenceCompleted {
                succeeded: false, ..
            } => warn!("[{}] {}", self.name, event.description()),
            _ => info!("[{}] {}", self.name, event.description()),
        }
        Ok(())
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}
