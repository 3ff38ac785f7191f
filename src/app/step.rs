use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::task::Task;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

/// Task that completes on `runtime` after `delay`, failing when `fail` is set.
/// `on_success` runs right before a successful completion.
pub(super) fn timed_step<F>(
    name: String,
    dispatcher: &Dispatcher,
    runtime: &Handle,
    delay: Duration,
    fail: bool,
    on_success: F,
) -> Arc<Task>
where
    F: FnOnce() + Send + 'static,
{
    let runtime = runtime.clone();
    Task::builder(name.clone())
        .dispatcher(dispatcher.clone())
        .build(move |task| {
            let continuation = Arc::clone(task);
            task.do_one_step(move || {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if fail {
                        continuation.complete(Err(EngineError::operation(name, "peer rejected")));
                    } else {
                        on_success();
                        debug!("Step '{}' done", name);
                        continuation.complete(Ok(()));
                    }
                });
                Ok(())
            });
            Ok(())
        })
}
