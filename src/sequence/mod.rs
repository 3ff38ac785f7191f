//! Serial and parallel composition of [`Task`]s.
//!
//! A [`TaskSequence`] is built with [`TaskSequence::add_task`], started once,
//! and completes exactly once. Exactly one of the `on_success` or
//! `on_failure` callbacks runs, posted to the sequence's dispatcher.

mod parallel;
mod serial;

#[cfg(test)]
mod tests;

use crate::completion::CompletionHandle;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Outcome};
use crate::events::{EventBus, LifecycleEvent};
use crate::lifecycle::ComponentLifecycle;
use crate::task::{Task, TaskResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type SuccessCallback = Box<dyn FnOnce() + Send + 'static>;
type FailureCallback = Box<dyn FnOnce(EngineError) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    /// One task at a time, in insertion order
    Serial,
    /// Every task started at once
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    NotStarted,
    Running,
    Completed,
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SequenceState::NotStarted => "not_started",
            SequenceState::Running => "running",
            SequenceState::Completed => "completed",
        };
        f.write_str(s)
    }
}

pub struct TaskSequence {
    id: Uuid,
    name: String,
    kind: SequenceKind,
    dispatcher: Dispatcher,
    owner: Option<ComponentLifecycle>,
    cancel: Option<CancellationToken>,
    event_bus: Option<EventBus>,
    inner: Mutex<SequenceInner>,
    completion: CompletionHandle,
}

struct SequenceInner {
    state: SequenceState,
    queue: VecDeque<Arc<Task>>,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
    // Serial: the single outstanding task.
    pending: Option<Arc<Task>>,
    last_result: Option<Arc<TaskResult>>,
    // Parallel: task count snapshotted at start.
    expected: usize,
    completed: Vec<Arc<Task>>,
}

impl TaskSequence {
    /// Serial sequence on the global dispatcher.
    pub fn serial(name: impl Into<String>) -> Arc<TaskSequence> {
        TaskSequenceBuilder::new(name, SequenceKind::Serial).build()
    }

    /// Parallel sequence on the global dispatcher.
    pub fn parallel(name: impl Into<String>) -> Arc<TaskSequence> {
        TaskSequenceBuilder::new(name, SequenceKind::Parallel).build()
    }

    pub fn builder(name: impl Into<String>, kind: SequenceKind) -> TaskSequenceBuilder {
        TaskSequenceBuilder::new(name, kind)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SequenceKind {
        self.kind
    }

    pub fn state(&self) -> SequenceState {
        self.inner.lock().state
    }

    /// Tasks still waiting to be started.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Result of the most recently completed task.
    pub fn last_result(&self) -> Option<Arc<TaskResult>> {
        self.inner.lock().last_result.clone()
    }

    /// Completed tasks in completion order.
    pub fn completed_tasks(&self) -> Vec<Arc<Task>> {
        self.inner.lock().completed.clone()
    }

    pub fn completion(&self) -> &CompletionHandle {
        &self.completion
    }

    /// Append a task. Only allowed before the sequence starts.
    pub fn add_task(&self, task: Arc<Task>) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        if inner.state != SequenceState::NotStarted {
            return Err(EngineError::invalid_state(
                self.name.as_str(),
                "add_task",
                inner.state,
            ));
        }
        debug!("Sequence '{}' queued task '{}'", self.name, task.name());
        inner.queue.push_back(task);
        Ok(())
    }

    /// Callback posted when the sequence succeeds.
    pub fn on_success<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.state == SequenceState::Completed {
            drop(inner);
            self.completion.on_complete(move |handle| {
                if let Some(Ok(())) = handle.outcome() {
                    callback();
                }
            });
            return;
        }
        inner.on_success = Some(Box::new(callback));
    }

    /// Callback posted with the error when the sequence fails.
    pub fn on_failure<F>(&self, callback: F)
    where
        F: FnOnce(EngineError) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.state == SequenceState::Completed {
            drop(inner);
            self.completion.on_complete(move |handle| {
                if let Some(Err(error)) = handle.outcome() {
                    callback(error);
                }
            });
            return;
        }
        inner.on_failure = Some(Box::new(callback));
    }

    /// Start the sequence. The returned handle completes with the sequence.
    pub fn start(self: &Arc<Self>) -> Result<CompletionHandle, EngineError> {
        {
            let mut inner = self.inner.lock();
            if inner.state != SequenceState::NotStarted {
                return Err(EngineError::invalid_state(
                    self.name.as_str(),
                    "start",
                    inner.state,
                ));
            }
            inner.state = SequenceState::Running;
            debug!(
                "Starting {:?} sequence '{}' with {} tasks",
                self.kind,
                self.name,
                inner.queue.len()
            );
        }

        self.watch_cancellation();

        match self.kind {
            SequenceKind::Serial => self.process_next(),
            SequenceKind::Parallel => self.start_all(),
        }
        Ok(self.completion.clone())
    }

    /// Wrap this sequence as a task so it can run inside another sequence.
    /// The task completes with the sequence, carrying the payload of its
    /// last task.
    pub fn into_task(self: Arc<Self>, optional: bool) -> Arc<Task> {
        Task::builder(self.name.clone())
            .optional(optional)
            .dispatcher(self.dispatcher.clone())
            .build(move |task| {
                let handle = self.start()?;
                let task = Arc::clone(task);
                let sequence = Arc::clone(&self);
                handle.on_complete(move |handle| {
                    let outcome = handle.outcome().unwrap_or_else(|| {
                        Err(EngineError::operation(sequence.name(), "outcome missing"))
                    });
                    let payload = sequence
                        .last_result()
                        .and_then(|result| result.payload().cloned());
                    task.complete_with(outcome, payload);
                });
                Ok(())
            })
    }

    /// Fail fast when cancelled or when the owning component is going away.
    fn check_owner(&self) -> Outcome {
        if self.is_cancelled() {
            warn!("Sequence '{}' cancelled", self.name);
            return Err(EngineError::cancelled(self.name.as_str()));
        }
        match &self.owner {
            Some(owner) if owner.is_shutting_down() => {
                warn!(
                    "Sequence '{}' abandoned, owner '{}' is {}",
                    self.name,
                    owner.name(),
                    owner.state()
                );
                Err(EngineError::invalid_state(
                    owner.name(),
                    format!("run sequence '{}'", self.name),
                    owner.state(),
                ))
            }
            _ => Ok(()),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|token| token.is_cancelled())
    }

    /// Complete promptly when the token fires while tasks are outstanding.
    /// Without a tokio runtime, cancellation is observed between tasks.
    fn watch_cancellation(self: &Arc<Self>) {
        let Some(token) = self.cancel.clone() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            debug!(
                "Sequence '{}' has no runtime, checking cancellation between tasks",
                self.name
            );
            return;
        };
        let sequence = Arc::clone(self);
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    sequence.abort(EngineError::cancelled(sequence.name.as_str()));
                }
                _ = sequence.completion.wait_async() => {}
            }
        });
    }

    /// Fail a running sequence. Late task completions are ignored afterwards.
    fn abort(&self, error: EngineError) -> bool {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.state != SequenceState::Running {
                return false;
            }
            warn!("Sequence '{}' aborted: {}", self.name, error);
            self.mark_completed(&mut inner)
        };
        self.deliver(Err(error), callbacks)
    }

    /// Subscribe the sequence to a task's completion.
    fn watch<F>(self: &Arc<Self>, task: &Arc<Task>, on_done: F)
    where
        F: FnOnce(&Arc<TaskSequence>, &Arc<Task>, Outcome) + Send + 'static,
    {
        let sequence = Arc::clone(self);
        let watched = Arc::clone(task);
        task.completion().on_complete(move |handle| {
            let outcome = handle.outcome().unwrap_or_else(|| {
                Err(EngineError::operation(watched.name(), "outcome missing"))
            });
            on_done(&sequence, &watched, outcome);
        });
    }

    /// Complete the sequence. Returns false if it had already completed.
    fn finish(&self, outcome: Outcome) -> bool {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.state == SequenceState::Completed {
                warn!(
                    "Sequence '{}' completed more than once, ignoring {:?}",
                    self.name, outcome
                );
                return false;
            }
            self.mark_completed(&mut inner)
        };
        self.deliver(outcome, callbacks)
    }

    /// Terminal transition, made under the sequence lock.
    fn mark_completed(&self, inner: &mut SequenceInner) -> FinishCallbacks {
        inner.state = SequenceState::Completed;
        inner.pending = None;
        if !inner.queue.is_empty() {
            debug!(
                "Sequence '{}' abandoning {} queued tasks",
                self.name,
                inner.queue.len()
            );
            inner.queue.clear();
        }
        FinishCallbacks {
            on_success: inner.on_success.take(),
            on_failure: inner.on_failure.take(),
        }
    }

    /// Report the outcome once the lock is released.
    fn deliver(&self, outcome: Outcome, callbacks: FinishCallbacks) -> bool {
        match &outcome {
            Ok(()) => info!("Sequence '{}' succeeded", self.name),
            Err(e) => error!("Sequence '{}' failed: {}", self.name, e),
        }

        if let Some(bus) = &self.event_bus {
            let error = outcome.as_ref().err().map(|e| e.to_string());
            bus.publish(LifecycleEvent::sequence_completed(&self.name, error));
        }

        match &outcome {
            Ok(()) => {
                if let Some(callback) = callbacks.on_success {
                    self.dispatcher.post(callback);
                }
            }
            Err(error) => {
                if let Some(callback) = callbacks.on_failure {
                    let error = error.clone();
                    self.dispatcher.post(move || callback(error));
                }
            }
        }

        self.completion.complete(outcome, false)
    }
}

struct FinishCallbacks {
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

impl fmt::Debug for TaskSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TaskSequence")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .field("completed", &inner.completed.len())
            .finish()
    }
}

/// Builder for [`TaskSequence`]
pub struct TaskSequenceBuilder {
    name: String,
    kind: SequenceKind,
    dispatcher: Option<Dispatcher>,
    owner: Option<ComponentLifecycle>,
    cancel: Option<CancellationToken>,
    event_bus: Option<EventBus>,
}

impl TaskSequenceBuilder {
    pub fn new(name: impl Into<String>, kind: SequenceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            dispatcher: None,
            owner: None,
            cancel: None,
            event_bus: None,
        }
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Fail with `InvalidState` instead of starting further tasks once
    /// `owner` is terminating or terminated.
    pub fn cancel_when_terminating(mut self, owner: ComponentLifecycle) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Fail with `Cancelled` once `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Arc<TaskSequence> {
        let dispatcher = self.dispatcher.unwrap_or_else(Dispatcher::global);
        Arc::new(TaskSequence {
            id: Uuid::new_v4(),
            name: self.name,
            kind: self.kind,
            completion: CompletionHandle::on_dispatcher(dispatcher.clone()),
            dispatcher,
            owner: self.owner,
            cancel: self.cancel,
            event_bus: self.event_bus,
            inner: Mutex::new(SequenceInner {
                state: SequenceState::NotStarted,
                queue: VecDeque::new(),
                on_success: None,
                on_failure: None,
                pending: None,
                last_result: None,
                expected: 0,
                completed: Vec::new(),
            }),
        })
    }
}
