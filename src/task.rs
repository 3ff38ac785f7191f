//! Units of possibly-asynchronous work with an exactly-once completion contract.

use crate::completion::CompletionHandle;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Outcome};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared, type-erased value a task hands to its successors.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Procedure run by [`Task::start_task`].
pub type TaskWorker = Box<dyn FnOnce(&Arc<Task>) -> Outcome + Send + 'static>;

/// Frozen result of a completed task, linked to the result before it.
#[derive(Clone)]
pub struct TaskResult {
    task_name: String,
    error: Option<EngineError>,
    payload: Option<Payload>,
    previous: Option<Arc<TaskResult>>,
}

impl TaskResult {
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Payload downcast to a concrete type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    pub fn previous(&self) -> Option<&Arc<TaskResult>> {
        self.previous.as_ref()
    }

    /// Walk the chain, most recent result first.
    pub fn history(&self) -> impl Iterator<Item = &TaskResult> {
        std::iter::successors(Some(self), |r| r.previous.as_deref())
    }
}

impl fmt::Debug for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskResult")
            .field("task_name", &self.task_name)
            .field("error", &self.error)
            .field("has_payload", &self.payload.is_some())
            .field("previous", &self.previous.as_ref().map(|p| p.task_name.as_str()))
            .finish()
    }
}

/// A unit of work inside a sequence.
///
/// The worker is invoked once by [`Task::start_task`] and must eventually
/// cause [`Task::complete`] to be called, either directly, through
/// [`Task::do_final_step`], or from a nested continuation.
pub struct Task {
    name: String,
    optional: bool,
    worker: Mutex<Option<TaskWorker>>,
    started: AtomicBool,
    in_worker: AtomicBool,
    completed: AtomicBool,
    previous: Mutex<Option<Arc<TaskResult>>>,
    result: Mutex<Option<Arc<TaskResult>>>,
    completion: CompletionHandle,
}

impl Task {
    /// Required task bound to the global dispatcher.
    pub fn new<F>(name: impl Into<String>, worker: F) -> Arc<Task>
    where
        F: FnOnce(&Arc<Task>) -> Outcome + Send + 'static,
    {
        TaskBuilder::new(name).build(worker)
    }

    /// Task whose worker receives an owned input state.
    pub fn with_state<S, F>(name: impl Into<String>, state: S, worker: F) -> Arc<Task>
    where
        S: Send + 'static,
        F: FnOnce(&Arc<Task>, S) -> Outcome + Send + 'static,
    {
        TaskBuilder::new(name).build(move |task| worker(task, state))
    }

    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Handle signalled once the task completes.
    pub fn completion(&self) -> &CompletionHandle {
        &self.completion
    }

    /// Result of the task that ran before this one in a serial chain.
    pub fn previous_result(&self) -> Option<Arc<TaskResult>> {
        self.previous.lock().clone()
    }

    pub(crate) fn set_previous(&self, previous: Option<Arc<TaskResult>>) {
        *self.previous.lock() = previous;
    }

    /// Result once completed.
    pub fn result(&self) -> Option<Arc<TaskResult>> {
        self.result.lock().clone()
    }

    /// Invoke the worker. Later calls are ignored.
    ///
    /// A worker returning `Err` completes the task with that error. A panic
    /// inside the worker is not caught here.
    pub fn start_task(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("Task '{}' already started", self.name);
            return;
        }

        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };

        debug!("Starting task '{}'", self.name);
        self.in_worker.store(true, Ordering::Release);
        let outcome = worker(self);
        self.in_worker.store(false, Ordering::Release);
        if let Err(error) = outcome {
            self.complete(Err(error));
        }
    }

    /// Run an intermediate step. On failure the task completes with the
    /// error; on success it stays pending for a nested continuation.
    /// Returns whether the step succeeded.
    pub fn do_one_step<F>(&self, step: F) -> bool
    where
        F: FnOnce() -> Outcome,
    {
        match step() {
            Ok(()) => true,
            Err(error) => {
                self.complete(Err(error));
                false
            }
        }
    }

    /// Run the terminal step and complete the task with its outcome.
    pub fn do_final_step<F>(&self, step: F)
    where
        F: FnOnce() -> Outcome,
    {
        let outcome = step();
        self.complete(outcome);
    }

    /// Complete the task. Returns false (and logs) if already completed.
    pub fn complete(&self, outcome: Outcome) -> bool {
        self.complete_with(outcome, None)
    }

    /// Complete the task carrying a payload for successors.
    pub fn complete_with(&self, outcome: Outcome, payload: Option<Payload>) -> bool {
        if self.completed.swap(true, Ordering::AcqRel) {
            warn!(
                "Task '{}' completed more than once, ignoring outcome {:?}",
                self.name, outcome
            );
            return false;
        }

        let result = Arc::new(TaskResult {
            task_name: self.name.clone(),
            error: outcome.clone().err(),
            payload,
            previous: self.previous.lock().clone(),
        });
        *self.result.lock() = Some(result);

        match &outcome {
            Ok(()) => debug!("Task '{}' completed", self.name),
            Err(e) if self.optional => debug!("Optional task '{}' failed: {}", self.name, e),
            Err(e) => debug!("Task '{}' failed: {}", self.name, e),
        }

        // Completed on the thread that is still inside the worker.
        let synchronously = self.in_worker.load(Ordering::Acquire);
        self.completion.complete(outcome, synchronously)
    }

    /// Complete this task with the outcome of a nested operation.
    pub fn complete_when(self: &Arc<Self>, nested: &CompletionHandle) {
        let task = Arc::clone(self);
        nested.on_complete(move |handle| {
            let outcome = handle
                .outcome()
                .unwrap_or_else(|| Err(EngineError::operation(task.name(), "nested outcome missing")));
            task.complete(outcome);
        });
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("optional", &self.optional)
            .field("started", &self.is_started())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Builder for [`Task`]
pub struct TaskBuilder {
    name: String,
    optional: bool,
    dispatcher: Option<Dispatcher>,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
            dispatcher: None,
        }
    }

    /// Failure of an optional task does not abort its sequence.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Pool used for completion notifications (global pool by default).
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build<F>(self, worker: F) -> Arc<Task>
    where
        F: FnOnce(&Arc<Task>) -> Outcome + Send + 'static,
    {
        let dispatcher = self.dispatcher.unwrap_or_else(Dispatcher::global);
        Arc::new(Task {
            name: self.name,
            optional: self.optional,
            worker: Mutex::new(Some(Box::new(worker))),
            started: AtomicBool::new(false),
            in_worker: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            previous: Mutex::new(None),
            result: Mutex::new(None),
            completion: CompletionHandle::on_dispatcher(dispatcher),
        })
    }

    pub fn build_with_state<S, F>(self, state: S, worker: F) -> Arc<Task>
    where
        S: Send + 'static,
        F: FnOnce(&Arc<Task>, S) -> Outcome + Send + 'static,
    {
        self.build(move |task| worker(task, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_start_task_runs_worker_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let task = Task::new("register", move |task| {
            counter.fetch_add(1, Ordering::SeqCst);
            task.complete(Ok(()));
            Ok(())
        });

        task.start_task();
        task.start_task();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.completion().end(), Ok(()));
        assert!(task.result().unwrap().succeeded());
    }

    #[test]
    fn test_worker_error_completes_task() {
        let task = Task::new("establish", |_| Err(EngineError::operation("dialog", "declined")));
        task.start_task();

        assert!(task.is_completed());
        assert_eq!(
            task.completion().end(),
            Err(EngineError::operation("dialog", "declined"))
        );
        assert_eq!(
            task.result().unwrap().error(),
            Some(&EngineError::operation("dialog", "declined"))
        );
    }

    #[test]
    fn test_do_one_step_keeps_task_pending_until_continuation() {
        let task = Task::new("async-step", |task| {
            let continuation = Arc::clone(task);
            task.do_one_step(move || {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    continuation.complete(Ok(()));
                });
                Ok(())
            });
            Ok(())
        });

        task.start_task();
        assert_eq!(task.completion().end(), Ok(()));
    }

    #[test]
    fn test_do_one_step_failure_completes_immediately() {
        let task = Task::new("lookup", |task| {
            let proceeded = task.do_one_step(|| Err(EngineError::operation("presence", "no route")));
            assert!(!proceeded);
            Ok(())
        });

        task.start_task();
        assert!(task.is_completed());
        assert!(task.completion().end().is_err());
    }

    #[test]
    fn test_do_final_step_completes_on_success() {
        let task = Task::new("final", |task| {
            task.do_final_step(|| Ok(()));
            Ok(())
        });
        task.start_task();
        assert!(task.is_completed());
        assert_eq!(task.completion().end(), Ok(()));
    }

    #[test]
    fn test_second_complete_is_ignored() {
        let task = Task::new("twice", |_| Ok(()));
        assert!(task.complete(Err(EngineError::operation("first", "x"))));
        assert!(!task.complete(Ok(())));
        assert!(!task.result().unwrap().succeeded());
    }

    #[test]
    fn test_with_state_passes_input_and_payload() {
        let task = Task::with_state("resolve", 7u32, |task, number| {
            let payload: Payload = Arc::new(number * 6);
            task.complete_with(Ok(()), Some(payload));
            Ok(())
        });
        task.start_task();
        task.completion().wait();

        let result = task.result().unwrap();
        assert_eq!(result.payload_as::<u32>(), Some(&42));
        assert_eq!(result.task_name(), "resolve");
    }

    #[test]
    fn test_history_walks_previous_results() {
        let first = Task::new("first", |_| Ok(()));
        first.complete(Ok(()));

        let second = Task::builder("second").optional(true).build(|_| Ok(()));
        second.set_previous(first.result());
        second.complete(Err(EngineError::operation("second", "skipped")));

        let names: Vec<_> = second
            .result()
            .unwrap()
            .history()
            .map(|r| r.task_name().to_string())
            .collect();
        assert_eq!(names, vec!["second", "first"]);
        assert!(second.is_optional());
    }

    #[test]
    #[should_panic(expected = "worker bug")]
    fn test_worker_panic_propagates() {
        let task = Task::new("buggy", |_| panic!("worker bug"));
        task.start_task();
    }
}
