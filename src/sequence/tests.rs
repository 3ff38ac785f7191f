use super::*;
use crate::lifecycle::ShutdownRequest;
use crate::task::Payload;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn recording_task(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Task> {
    let log = Arc::clone(log);
    let label = name.to_string();
    Task::new(name, move |task| {
        log.lock().push(label);
        task.complete(Ok(()));
        Ok(())
    })
}

fn failing_task(name: &str, optional: bool, started: &Arc<AtomicBool>) -> Arc<Task> {
    let started = Arc::clone(started);
    let label = name.to_string();
    Task::builder(name).optional(optional).build(move |task| {
        started.store(true, Ordering::SeqCst);
        task.complete(Err(EngineError::operation(label, "rejected")));
        Ok(())
    })
}

/// Task that stays pending until completed from the test body.
fn held_task(name: &str, started: &Arc<AtomicUsize>) -> Arc<Task> {
    let started = Arc::clone(started);
    Task::new(name, move |_| {
        started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[test]
fn test_serial_runs_tasks_in_order_and_succeeds_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sequence = TaskSequence::serial("startup");
    for name in ["transport", "registrar", "presence", "ready"] {
        sequence.add_task(recording_task(name, &log)).unwrap();
    }

    let (tx, rx) = mpsc::channel();
    let failure_tx = tx.clone();
    sequence.on_success(move || tx.send("success").unwrap());
    sequence.on_failure(move |_| failure_tx.send("failure").unwrap());

    let handle = sequence.start().unwrap();
    assert_eq!(handle.end_timeout("serial", WAIT), Ok(()));

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "success");
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(
        *log.lock(),
        vec!["transport", "registrar", "presence", "ready"]
    );
    assert_eq!(sequence.state(), SequenceState::Completed);
    assert_eq!(sequence.completed_tasks().len(), 4);
}

#[test]
fn test_serial_required_failure_abandons_remaining_tasks() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let failed_started = Arc::new(AtomicBool::new(false));
    let sequence = TaskSequence::serial("establish");
    sequence.add_task(recording_task("first", &log)).unwrap();
    sequence
        .add_task(failing_task("second", false, &failed_started))
        .unwrap();
    sequence.add_task(recording_task("third", &log)).unwrap();
    sequence.add_task(recording_task("fourth", &log)).unwrap();

    let (tx, rx) = mpsc::channel();
    let success_tx = tx.clone();
    sequence.on_success(move || success_tx.send(None).unwrap());
    sequence.on_failure(move |error| tx.send(Some(error)).unwrap());

    let outcome = sequence.start().unwrap().end_timeout("serial", WAIT);
    let expected = EngineError::operation("second", "rejected");
    assert_eq!(outcome, Err(expected.clone()));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Some(expected));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    assert!(failed_started.load(Ordering::SeqCst));
    assert_eq!(*log.lock(), vec!["first"]);
    assert!(sequence.is_empty());
}

#[test]
fn test_serial_optional_failure_continues_and_chains_results() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let optional_started = Arc::new(AtomicBool::new(false));
    let sequence = TaskSequence::serial("presence");
    sequence.add_task(recording_task("lookup", &log)).unwrap();
    sequence
        .add_task(failing_task("publish", true, &optional_started))
        .unwrap();
    sequence.add_task(recording_task("subscribe", &log)).unwrap();

    assert_eq!(sequence.start().unwrap().end_timeout("serial", WAIT), Ok(()));
    assert_eq!(*log.lock(), vec!["lookup", "subscribe"]);

    let last = sequence.last_result().unwrap();
    let history: Vec<_> = last.history().map(|r| r.task_name().to_string()).collect();
    assert_eq!(history, vec!["subscribe", "publish", "lookup"]);
    assert!(!last.previous().unwrap().succeeded());
}

#[test]
fn test_serial_synchronous_worker_error_fails_sequence() {
    let sequence = TaskSequence::serial("sync-failure");
    sequence
        .add_task(Task::new("bind", |_| {
            Err(EngineError::operation("bind", "address in use"))
        }))
        .unwrap();

    let outcome = sequence.start().unwrap().end_timeout("serial", WAIT);
    assert_eq!(outcome, Err(EngineError::operation("bind", "address in use")));
}

#[test]
fn test_serial_payload_flows_to_next_task() {
    let sequence = TaskSequence::serial("payload");
    sequence
        .add_task(Task::new("produce", |task| {
            let payload: Payload = Arc::new(String::from("sip:alice@example.com"));
            task.complete_with(Ok(()), Some(payload));
            Ok(())
        }))
        .unwrap();

    let (tx, rx) = mpsc::channel();
    sequence
        .add_task(Task::new("consume", move |task| {
            let uri = task
                .previous_result()
                .and_then(|r| r.payload_as::<String>().cloned());
            tx.send(uri).unwrap();
            task.complete(Ok(()));
            Ok(())
        }))
        .unwrap();

    assert_eq!(sequence.start().unwrap().end_timeout("serial", WAIT), Ok(()));
    assert_eq!(
        rx.recv_timeout(WAIT).unwrap().as_deref(),
        Some("sip:alice@example.com")
    );
}

#[test]
fn test_serial_starts_next_task_only_after_previous_completes() {
    let started = Arc::new(AtomicUsize::new(0));
    let sequence = TaskSequence::serial("ordered");
    let first = held_task("first", &started);
    let second = held_task("second", &started);
    sequence.add_task(Arc::clone(&first)).unwrap();
    sequence.add_task(Arc::clone(&second)).unwrap();

    let handle = sequence.start().unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert!(!handle.wait_for(Duration::from_millis(100)));
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert!(!second.is_started());

    first.complete(Ok(()));
    let deadline = std::time::Instant::now() + WAIT;
    while started.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(sequence.state(), SequenceState::Running);

    second.complete(Ok(()));
    assert_eq!(handle.end_timeout("serial", WAIT), Ok(()));
    assert_eq!(sequence.completed_tasks().len(), 2);
}

#[test]
fn test_serial_empty_sequence_succeeds() {
    let sequence = TaskSequence::serial("empty");
    assert_eq!(sequence.start().unwrap().end_timeout("serial", WAIT), Ok(()));
}

#[test]
fn test_parallel_starts_all_and_waits_for_every_completion() {
    let started = Arc::new(AtomicUsize::new(0));
    let sequence = TaskSequence::parallel("sessions");
    let tasks: Vec<_> = (0..3)
        .map(|i| held_task(&format!("session-{}", i), &started))
        .collect();
    for task in &tasks {
        sequence.add_task(Arc::clone(task)).unwrap();
    }

    let successes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&successes);
    sequence.on_success(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handle = sequence.start().unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 3);

    tasks[0].complete(Ok(()));
    tasks[2].complete(Ok(()));
    assert!(!handle.wait_for(Duration::from_millis(100)));
    assert_eq!(sequence.state(), SequenceState::Running);

    tasks[1].complete(Ok(()));
    assert_eq!(handle.end_timeout("parallel", WAIT), Ok(()));

    // Success callback is posted to the dispatcher after completion.
    let deadline = std::time::Instant::now() + WAIT;
    while successes.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(sequence.completed_tasks().len(), 3);
}

#[test]
fn test_parallel_empty_sequence_succeeds_immediately() {
    let sequence = TaskSequence::parallel("nothing");
    let (tx, rx) = mpsc::channel();
    sequence.on_success(move || tx.send(()).unwrap());

    let handle = sequence.start().unwrap();
    assert_eq!(handle.end_timeout("parallel", WAIT), Ok(()));
    rx.recv_timeout(WAIT).unwrap();
    assert!(sequence.completed_tasks().is_empty());
}

#[test]
fn test_parallel_first_required_failure_wins() {
    let started = Arc::new(AtomicUsize::new(0));
    let sequence = TaskSequence::parallel("teardown");
    let tasks: Vec<_> = (0..3)
        .map(|i| held_task(&format!("leg-{}", i), &started))
        .collect();
    for task in &tasks {
        sequence.add_task(Arc::clone(task)).unwrap();
    }

    let handle = sequence.start().unwrap();
    tasks[1].complete(Err(EngineError::operation("leg-1", "hangup failed")));
    assert_eq!(
        handle.end_timeout("parallel", WAIT),
        Err(EngineError::operation("leg-1", "hangup failed"))
    );

    // Later completions, including another failure, do not change the outcome.
    tasks[0].complete(Err(EngineError::operation("leg-0", "also failed")));
    tasks[2].complete(Ok(()));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        handle.outcome(),
        Some(Err(EngineError::operation("leg-1", "hangup failed")))
    );
    assert_eq!(sequence.completed_tasks().len(), 1);
}

#[test]
fn test_parallel_optional_failure_does_not_fail_sequence() {
    let flag = Arc::new(AtomicBool::new(false));
    let sequence = TaskSequence::parallel("optional");
    sequence.add_task(failing_task("im", true, &flag)).unwrap();
    sequence
        .add_task(Task::new("audio", |task| {
            task.complete(Ok(()));
            Ok(())
        }))
        .unwrap();

    assert_eq!(sequence.start().unwrap().end_timeout("parallel", WAIT), Ok(()));
    assert!(flag.load(Ordering::SeqCst));
}

#[test]
fn test_add_task_and_restart_rejected_once_started() {
    let sequence = TaskSequence::serial("frozen");
    sequence.start().unwrap().end_timeout("serial", WAIT).unwrap();

    let late = Task::new("late", |_| Ok(()));
    assert!(matches!(
        sequence.add_task(late),
        Err(EngineError::InvalidState { .. })
    ));
    assert!(matches!(
        sequence.start(),
        Err(EngineError::InvalidState { .. })
    ));
}

#[test]
fn test_sequence_fails_fast_when_owner_terminating() {
    let owner = ComponentLifecycle::new("endpoint");
    let request = owner.request_shutdown(Box::new(|| {}));
    assert!(matches!(request, ShutdownRequest::Invoke(_)));

    let started = Arc::new(AtomicUsize::new(0));
    let sequence = TaskSequence::builder("guarded", SequenceKind::Serial)
        .cancel_when_terminating(owner.clone())
        .build();
    sequence.add_task(held_task("never", &started)).unwrap();

    let outcome = sequence.start().unwrap().end_timeout("serial", WAIT);
    assert!(matches!(outcome, Err(EngineError::InvalidState { .. })));
    assert_eq!(started.load(Ordering::SeqCst), 0);

    owner.complete_shutdown(Ok(()));
}

#[test]
fn test_serial_cancelled_between_tasks() {
    let token = CancellationToken::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sequence = TaskSequence::builder("cancellable", SequenceKind::Serial)
        .cancel_on(token.clone())
        .build();

    let cancel = token.clone();
    sequence
        .add_task(Task::new("cancel", move |task| {
            cancel.cancel();
            task.complete(Ok(()));
            Ok(())
        }))
        .unwrap();
    sequence.add_task(recording_task("after", &log)).unwrap();

    let outcome = sequence.start().unwrap().end_timeout("serial", WAIT);
    assert!(matches!(outcome, Err(EngineError::Cancelled { .. })));
    assert!(log.lock().is_empty());
    assert_eq!(sequence.completed_tasks().len(), 1);
}

#[tokio::test]
async fn test_parallel_cancel_completes_without_waiting_for_tasks() {
    let token = CancellationToken::new();
    let started = Arc::new(AtomicUsize::new(0));
    let sequence = TaskSequence::builder("fan-out", SequenceKind::Parallel)
        .cancel_on(token.clone())
        .build();
    let tasks: Vec<_> = (0..3)
        .map(|i| held_task(&format!("held-{}", i), &started))
        .collect();
    for task in &tasks {
        sequence.add_task(Arc::clone(task)).unwrap();
    }

    let handle = sequence.start().unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 3);
    token.cancel();

    let outcome = tokio::time::timeout(WAIT, handle.wait_async()).await.unwrap();
    assert!(matches!(outcome, Err(EngineError::Cancelled { .. })));

    // Completions arriving after cancellation are ignored.
    for task in &tasks {
        task.complete(Ok(()));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sequence.state(), SequenceState::Completed);
    assert!(matches!(handle.outcome(), Some(Err(EngineError::Cancelled { .. }))));
}

#[test]
fn test_nested_sequence_runs_as_task() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let inner = TaskSequence::parallel("children");
    inner.add_task(recording_task("child-a", &log)).unwrap();
    inner.add_task(recording_task("child-b", &log)).unwrap();

    let outer = TaskSequence::serial("parent");
    outer.add_task(recording_task("before", &log)).unwrap();
    outer.add_task(Arc::clone(&inner).into_task(false)).unwrap();
    outer.add_task(recording_task("after", &log)).unwrap();

    assert_eq!(outer.start().unwrap().end_timeout("outer", WAIT), Ok(()));

    let log = log.lock();
    assert_eq!(log.first().map(String::as_str), Some("before"));
    assert_eq!(log.last().map(String::as_str), Some("after"));
    assert_eq!(log.len(), 4);
    assert_eq!(inner.state(), SequenceState::Completed);
}

#[test]
fn test_optional_nested_sequence_failure_is_tolerated() {
    let flag = Arc::new(AtomicBool::new(false));
    let inner = TaskSequence::serial("best-effort");
    inner.add_task(failing_task("publish", false, &flag)).unwrap();

    let outer = TaskSequence::serial("parent");
    outer.add_task(Arc::clone(&inner).into_task(true)).unwrap();

    assert_eq!(outer.start().unwrap().end_timeout("outer", WAIT), Ok(()));
    assert!(inner.completion().outcome().unwrap().is_err());
}

#[test]
fn test_completion_event_published() {
    let bus = EventBus::new(16);
    let mut receiver = bus.subscribe();
    let sequence = TaskSequence::builder("observed", SequenceKind::Serial)
        .event_bus(bus.clone())
        .build();

    sequence.start().unwrap().end_timeout("serial", WAIT).unwrap();

    match receiver.try_recv().unwrap() {
        LifecycleEvent::SequenceCompleted {
            sequence, succeeded, ..
        } => {
            assert_eq!(sequence, "observed");
            assert!(succeeded);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_late_callback_registration_still_fires() {
    let sequence = TaskSequence::serial("late");
    sequence.start().unwrap().end_timeout("serial", WAIT).unwrap();

    let (tx, rx) = mpsc::channel();
    sequence.on_success(move || tx.send(()).unwrap());
    rx.recv_timeout(WAIT).unwrap();
}
