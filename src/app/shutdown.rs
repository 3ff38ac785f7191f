use super::{EngineOrchestrator, ShutdownReason};
use crate::events::LifecycleEvent;
use crate::lifecycle::ComponentExt;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl EngineOrchestrator {
    /// Shut the endpoint down and report the process exit code.
    pub async fn shutdown(&self, reason: &ShutdownReason) -> i32 {
        info!("Beginning graceful shutdown ({})", reason);

        self.cancellation_token.cancel();
        self.event_bus
            .publish(LifecycleEvent::shutdown_requested(reason.to_string()));

        let limit = self.config.lifecycle.shutdown_timeout();
        let mut exit_code = match reason {
            ShutdownReason::Error(_) => 1,
            _ => 0,
        };

        match timeout(limit, self.endpoint.shutdown()).await {
            Ok(Ok(())) => info!("Endpoint '{}' terminated", self.endpoint.name()),
            Ok(Err(e)) => {
                error!("Error shutting down endpoint: {}", e);
                exit_code = 1;
            }
            Err(_) => {
                warn!("Endpoint shutdown timed out after {:?}", limit);
                exit_code = 1;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        exit_code
    }
}
