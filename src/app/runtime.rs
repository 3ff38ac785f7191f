use super::orchestrator::ShutdownSender;
use super::{EngineOrchestrator, ShutdownReason};
use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

impl EngineOrchestrator {
    /// Wait for a shutdown request or signal, then shut down.
    pub async fn run(&mut self) -> Result<i32> {
        info!("Lifecycle engine is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| Error::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers();

        let reason = shutdown_receiver
            .await
            .map_err(|_| Error::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {}", reason);
        Ok(self.shutdown(&reason).await)
    }

    /// Ask a running [`EngineOrchestrator::run`] to shut down. Returns false
    /// if shutdown was already requested.
    pub async fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        send_reason(&self.shutdown_sender, reason).await
    }

    fn setup_signal_handlers(&self) {
        // SIGTERM, Unix only
        #[cfg(unix)]
        {
            let sender = Arc::clone(&self.shutdown_sender);
            let token = self.cancellation_token.clone();
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                tokio::select! {
                    Some(()) = sigterm.recv() => {
                        info!("Received SIGTERM signal");
                        send_reason(&sender, ShutdownReason::Signal("SIGTERM".to_string())).await;
                    }
                    _ = token.cancelled() => {}
                }
            });
        }

        // SIGINT (Ctrl+C)
        let sender = Arc::clone(&self.shutdown_sender);
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                Ok(()) = signal::ctrl_c() => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    send_reason(&sender, ShutdownReason::Signal("SIGINT".to_string())).await;
                }
                _ = token.cancelled() => {}
            }
        });
    }
}

async fn send_reason(sender: &ShutdownSender, reason: ShutdownReason) -> bool {
    match sender.lock().await.take() {
        Some(sender) => sender.send(reason).is_ok(),
        None => false,
    }
}
