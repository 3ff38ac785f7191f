use super::EngineOrchestrator;
use crate::error::{EngineError, Result};
use crate::lifecycle::ComponentExt;
use tokio::time::timeout;
use tracing::{error, info};

impl EngineOrchestrator {
    /// Start the endpoint and wait for it, bounded by the startup timeout.
    pub async fn start(&self) -> Result<()> {
        info!("Starting lifecycle engine");
        let limit = self.config.lifecycle.startup_timeout();

        let handle = self.endpoint.begin_startup().map_err(|e| {
            error!("Failed to request endpoint startup: {}", e);
            e
        })?;

        match timeout(limit, handle.wait_async()).await {
            Ok(Ok(())) => {
                info!("Endpoint '{}' started", self.endpoint.name());
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Endpoint startup failed: {}", e);
                Err(e.into())
            }
            Err(_) => {
                error!("Endpoint startup timed out after {:?}", limit);
                Err(EngineError::timeout("endpoint startup", limit).into())
            }
        }
    }
}
