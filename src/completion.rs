//! Exactly-once completion signal behind every begin/end style operation.
//!
//! A [`CompletionHandle`] starts out `Pending` and is completed by exactly one
//! producer. Consumers can block on it ([`CompletionHandle::end`]), await it
//! ([`CompletionHandle::wait_async`]) or register callbacks that run once the
//! outcome is known. Callbacks are always posted to a [`Dispatcher`], never
//! run on the thread that completes the handle; handles built without one use
//! [`Dispatcher::global`].

use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Outcome};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Completion progress of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Pending,
    CompletedSynchronously,
    CompletedAsynchronously,
}

const PENDING: u8 = 0;
const COMPLETING: u8 = 1;
const COMPLETED_SYNC: u8 = 2;
const COMPLETED_ASYNC: u8 = 3;

pub type CompletionCallback = Box<dyn FnOnce(&CompletionHandle) + Send + 'static>;

/// One-shot asynchronous result shared between a producer and its waiters.
#[derive(Clone)]
pub struct CompletionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    state: AtomicU8,
    outcome: OnceLock<Outcome>,
    callbacks: Mutex<Vec<CompletionCallback>>,
    // Condvar is created by the first blocking waiter only.
    waiter: Mutex<Option<Arc<Condvar>>>,
    notify: Notify,
    dispatcher: Dispatcher,
    state_object: Option<Arc<dyn Any + Send + Sync>>,
}

impl CompletionHandle {
    fn with_parts(
        callback: Option<CompletionCallback>,
        state_object: Option<Arc<dyn Any + Send + Sync>>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                state: AtomicU8::new(PENDING),
                outcome: OnceLock::new(),
                callbacks: Mutex::new(callback.into_iter().collect()),
                waiter: Mutex::new(None),
                notify: Notify::new(),
                dispatcher,
                state_object,
            }),
        }
    }

    /// Pending handle whose callbacks are posted to the global dispatcher.
    pub fn new() -> Self {
        Self::with_parts(None, None, Dispatcher::global())
    }

    /// Pending handle whose callbacks are posted to `dispatcher`.
    pub fn on_dispatcher(dispatcher: Dispatcher) -> Self {
        Self::with_parts(None, None, dispatcher)
    }

    /// Pending handle that invokes `callback` once completed.
    pub fn begin<F>(callback: F) -> Self
    where
        F: FnOnce(&CompletionHandle) + Send + 'static,
    {
        Self::with_parts(Some(Box::new(callback)), None, Dispatcher::global())
    }

    /// Like [`CompletionHandle::begin`], carrying caller state retrievable via
    /// [`CompletionHandle::async_state`].
    pub fn begin_with_state<F, S>(callback: F, state: S) -> Self
    where
        F: FnOnce(&CompletionHandle) + Send + 'static,
        S: Any + Send + Sync,
    {
        Self::with_parts(
            Some(Box::new(callback)),
            Some(Arc::new(state)),
            Dispatcher::global(),
        )
    }

    /// Handle that is already satisfied, for operations that finish on the spot.
    pub fn completed(outcome: Outcome) -> Self {
        Self::completed_on(Dispatcher::global(), outcome)
    }

    /// [`CompletionHandle::completed`] with late callbacks posted to `dispatcher`.
    pub fn completed_on(dispatcher: Dispatcher, outcome: Outcome) -> Self {
        let handle = Self::on_dispatcher(dispatcher);
        handle.complete(outcome, true);
        handle
    }

    /// Record the outcome. Only the first caller wins; returns whether this
    /// call was the one that completed the handle.
    pub fn complete(&self, outcome: Outcome, completed_synchronously: bool) -> bool {
        if self
            .inner
            .state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Completion handle already completed, dropping late outcome");
            return false;
        }

        // Only the CAS winner reaches this point, so the set cannot fail.
        let _ = self.inner.outcome.set(outcome);
        let final_state = if completed_synchronously {
            COMPLETED_SYNC
        } else {
            COMPLETED_ASYNC
        };
        self.inner.state.store(final_state, Ordering::Release);

        {
            let waiter = self.inner.waiter.lock();
            if let Some(condvar) = waiter.as_ref() {
                condvar.notify_all();
            }
        }
        self.inner.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        trace!("Completion handle firing {} callbacks", callbacks.len());
        for callback in callbacks {
            self.dispatch(callback);
        }
        true
    }

    /// Register a callback. Posted right away if already complete.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&CompletionHandle) + Send + 'static,
    {
        let callback: CompletionCallback = Box::new(callback);
        {
            let mut callbacks = self.inner.callbacks.lock();
            if !self.is_completed() {
                callbacks.push(callback);
                return;
            }
        }
        self.dispatch(callback);
    }

    fn dispatch(&self, callback: CompletionCallback) {
        let handle = self.clone();
        self.inner.dispatcher.post(move || callback(&handle));
    }

    pub fn state(&self) -> CompletionState {
        match self.inner.state.load(Ordering::Acquire) {
            COMPLETED_SYNC => CompletionState::CompletedSynchronously,
            COMPLETED_ASYNC => CompletionState::CompletedAsynchronously,
            _ => CompletionState::Pending,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) >= COMPLETED_SYNC
    }

    pub fn completed_synchronously(&self) -> bool {
        self.state() == CompletionState::CompletedSynchronously
    }

    /// Outcome if already completed.
    pub fn outcome(&self) -> Option<Outcome> {
        if self.is_completed() {
            self.inner.outcome.get().cloned()
        } else {
            None
        }
    }

    /// Caller state supplied to [`CompletionHandle::begin_with_state`].
    pub fn async_state<S: Any>(&self) -> Option<&S> {
        self.inner
            .state_object
            .as_deref()
            .and_then(|state| state.downcast_ref::<S>())
    }

    /// Block until completed.
    pub fn wait(&self) {
        if self.is_completed() {
            return;
        }
        let mut waiter = self.inner.waiter.lock();
        let condvar = Arc::clone(waiter.get_or_insert_with(|| Arc::new(Condvar::new())));
        while !self.is_completed() {
            condvar.wait(&mut waiter);
        }
    }

    /// Block until completed or `timeout` elapses; returns whether completed.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        if self.is_completed() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut waiter = self.inner.waiter.lock();
        let condvar = Arc::clone(waiter.get_or_insert_with(|| Arc::new(Condvar::new())));
        while !self.is_completed() {
            if condvar.wait_until(&mut waiter, deadline).timed_out() {
                return self.is_completed();
            }
        }
        true
    }

    /// Block until completed and return the recorded outcome.
    pub fn end(&self) -> Outcome {
        self.wait();
        self.recorded_outcome()
    }

    /// Bounded [`CompletionHandle::end`]; expiry surfaces as a timeout failure.
    pub fn end_timeout(&self, operation: &str, timeout: Duration) -> Outcome {
        if self.wait_for(timeout) {
            self.recorded_outcome()
        } else {
            Err(EngineError::timeout(operation, timeout))
        }
    }

    /// Await completion and return the recorded outcome.
    pub async fn wait_async(&self) -> Outcome {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_completed() {
                return self.recorded_outcome();
            }
            notified.await;
        }
    }

    fn recorded_outcome(&self) -> Outcome {
        self.inner
            .outcome
            .get()
            .cloned()
            .unwrap_or_else(|| Err(EngineError::operation("completion", "outcome missing")))
    }

    /// True when both handles refer to the same operation.
    pub fn ptr_eq(&self, other: &CompletionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CompletionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("state", &self.state())
            .field("outcome", &self.inner.outcome.get())
            .finish()
    }
}
