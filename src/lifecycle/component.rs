use super::{ComponentLifecycle, ShutdownRequest};
use crate::completion::CompletionHandle;
use crate::error::{EngineError, Outcome};
use async_trait::async_trait;
use std::sync::Arc;

/// A long-lived service object driven by a [`ComponentLifecycle`].
///
/// `startup_core` and `shutdown_core` are invoked at most once per
/// transition and must eventually call `complete_startup` or
/// `complete_shutdown` on the component's lifecycle exactly once, from any
/// thread.
pub trait Component: Send + Sync + 'static {
    fn lifecycle(&self) -> &ComponentLifecycle;

    fn startup_core(self: Arc<Self>);

    fn shutdown_core(self: Arc<Self>);
}

/// Begin/end entry points for every [`Component`].
#[async_trait]
pub trait ComponentExt {
    /// Request startup. Fails with `InvalidState` unless the component is Idle.
    fn begin_startup(&self) -> Result<CompletionHandle, EngineError>;

    /// Request shutdown. Concurrent callers share a single `shutdown_core`
    /// run and are released together.
    fn begin_shutdown(&self) -> CompletionHandle;

    async fn start(&self) -> Outcome;

    async fn shutdown(&self) -> Outcome;
}

#[async_trait]
impl<C: Component> ComponentExt for Arc<C> {
    fn begin_startup(&self) -> Result<CompletionHandle, EngineError> {
        let handle = self.lifecycle().request_startup()?;
        Arc::clone(self).startup_core();
        Ok(handle)
    }

    fn begin_shutdown(&self) -> CompletionHandle {
        let deferred = Arc::clone(self);
        let request = self
            .lifecycle()
            .request_shutdown(Box::new(move || deferred.shutdown_core()));

        match request {
            ShutdownRequest::Invoke(handle) => {
                Arc::clone(self).shutdown_core();
                handle
            }
            ShutdownRequest::Queued(handle) | ShutdownRequest::Satisfied(handle) => handle,
        }
    }

    async fn start(&self) -> Outcome {
        self.begin_startup()?.wait_async().await
    }

    async fn shutdown(&self) -> Outcome {
        self.begin_shutdown().wait_async().await
    }
}
