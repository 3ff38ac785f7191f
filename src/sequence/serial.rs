use super::{SequenceState, TaskSequence};
use crate::error::Outcome;
use crate::task::Task;
use std::sync::Arc;
use tracing::{debug, warn};

impl TaskSequence {
    /// Dequeue the next task, chain the previous result into it and start it.
    pub(super) fn process_next(self: &Arc<Self>) {
        if let Err(error) = self.check_owner() {
            self.finish(Err(error));
            return;
        }

        let next = {
            let mut inner = self.inner.lock();
            if inner.state != SequenceState::Running {
                return;
            }
            match inner.queue.pop_front() {
                Some(task) => {
                    task.set_previous(inner.last_result.clone());
                    inner.pending = Some(Arc::clone(&task));
                    Some(task)
                }
                None => None,
            }
        };

        let Some(task) = next else {
            self.finish(Ok(()));
            return;
        };

        debug!("Sequence '{}' starting task '{}'", self.name, task.name());
        self.watch(&task, |sequence, task, outcome| {
            sequence.on_serial_task_completed(task, outcome);
        });
        task.start_task();
    }

    fn on_serial_task_completed(self: &Arc<Self>, task: &Arc<Task>, outcome: Outcome) {
        {
            let mut inner = self.inner.lock();
            if inner.state != SequenceState::Running {
                debug!(
                    "Sequence '{}' ignoring completion of '{}' after finishing",
                    self.name,
                    task.name()
                );
                return;
            }
            match &inner.pending {
                Some(pending) if Arc::ptr_eq(pending, task) => {}
                _ => {
                    warn!(
                        "Sequence '{}' got completion of '{}' which is not pending",
                        self.name,
                        task.name()
                    );
                    return;
                }
            }
            inner.pending = None;
            inner.last_result = task.result();
            inner.completed.push(Arc::clone(task));
        }

        match outcome {
            Err(error) if !task.is_optional() => {
                self.finish(Err(error));
            }
            Err(error) => {
                warn!(
                    "Optional task '{}' in sequence '{}' failed: {}",
                    task.name(),
                    self.name,
                    error
                );
                self.process_next();
            }
            Ok(()) => self.process_next(),
        }
    }
}
