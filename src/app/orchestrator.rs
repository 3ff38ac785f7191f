use super::endpoint::Endpoint;
use super::types::ShutdownReason;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::events::EventBus;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub(super) type ShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

/// Drives the demo endpoint through start, run and shutdown.
pub struct EngineOrchestrator {
    pub(super) config: EngineConfig,
    pub(super) dispatcher: Dispatcher,
    pub(super) event_bus: EventBus,
    pub(super) endpoint: Arc<Endpoint>,

    // Lifecycle management
    pub(super) shutdown_sender: ShutdownSender,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl EngineOrchestrator {
    /// Build the dispatcher, event bus and endpoint described by `config`.
    /// Must be called from within a tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let dispatcher = Dispatcher::new(&config.dispatcher)?;
        let event_bus = EventBus::new(config.lifecycle.event_bus_capacity);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let cancellation_token = CancellationToken::new();

        let endpoint = Endpoint::new(
            "endpoint",
            dispatcher.clone(),
            event_bus.clone(),
            Handle::current(),
            config.demo.step_delay(),
            cancellation_token.child_token(),
        );

        Ok(Self {
            config,
            dispatcher,
            event_bus,
            endpoint,
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token,
        })
    }

    /// Register the configured demo sessions on the endpoint.
    pub fn initialize(&self) {
        for index in 0..self.config.demo.sessions {
            let fail = self.config.demo.fail_session == Some(index);
            self.endpoint.open_session(&format!("session-{}", index), fail);
        }
        info!(
            "Registered {} sessions on '{}'",
            self.endpoint.session_count(),
            self.endpoint.name()
        );
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Token cancelled once shutdown begins. An endpoint startup still in
    /// flight at that point fails with `Cancelled`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}
