use super::{SequenceState, TaskSequence};
use crate::error::{EngineError, Outcome};
use crate::task::Task;
use std::sync::Arc;
use tracing::{debug, warn};

impl TaskSequence {
    /// Snapshot the task count and start every task without waiting.
    pub(super) fn start_all(self: &Arc<Self>) {
        if let Err(error) = self.check_owner() {
            self.finish(Err(error));
            return;
        }

        let tasks: Vec<Arc<Task>> = {
            let mut inner = self.inner.lock();
            inner.expected = inner.queue.len();
            inner.queue.drain(..).collect()
        };

        if tasks.is_empty() {
            self.finish(Ok(()));
            return;
        }

        for task in &tasks {
            self.watch(task, |sequence, task, outcome| {
                sequence.on_parallel_task_completed(task, outcome);
            });
        }

        debug!(
            "Sequence '{}' fanning out {} tasks",
            self.name,
            tasks.len()
        );
        for task in tasks {
            task.start_task();
        }
    }

    fn on_parallel_task_completed(self: &Arc<Self>, task: &Arc<Task>, outcome: Outcome) {
        let (outcome, callbacks) = {
            let mut inner = self.inner.lock();
            if inner.state != SequenceState::Running {
                debug!(
                    "Sequence '{}' ignoring late completion of '{}' ({:?})",
                    self.name,
                    task.name(),
                    outcome
                );
                return;
            }
            if inner.completed.len() >= inner.expected {
                warn!(
                    "Sequence '{}' got more completions than its {} tasks",
                    self.name, inner.expected
                );
                return;
            }
            inner.completed.push(Arc::clone(task));
            inner.last_result = task.result();

            let outcome = match outcome {
                Err(error) if !task.is_optional() => Err(error),
                Err(error) => {
                    warn!(
                        "Optional task '{}' in sequence '{}' failed: {}",
                        task.name(),
                        self.name,
                        error
                    );
                    Ok(())
                }
                Ok(()) => Ok(()),
            };
            let outcome = match outcome {
                Ok(()) if self.is_cancelled() => Err(EngineError::cancelled(self.name.as_str())),
                outcome => outcome,
            };

            // First required failure wins; otherwise wait for every task.
            if outcome.is_ok() && inner.completed.len() < inner.expected {
                return;
            }
            (outcome, self.mark_completed(&mut inner))
        };

        self.deliver(outcome, callbacks);
    }
}
