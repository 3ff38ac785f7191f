use super::*;
use crate::config::EngineConfig;
use crate::error::{EngineError, Error};
use crate::events::LifecycleEvent;
use crate::lifecycle::{Component, ComponentState};
use std::time::Duration;

fn create_test_config(sessions: usize, fail_session: Option<usize>) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.dispatcher.worker_threads = 2;
    config.dispatcher.thread_name = "app-test".to_string();
    config.demo.sessions = sessions;
    config.demo.step_delay_ms = 5;
    config.demo.fail_session = fail_session;
    config
}

fn session_states(orchestrator: &EngineOrchestrator) -> Vec<ComponentState> {
    orchestrator
        .snapshot(0)
        .endpoint
        .sessions
        .iter()
        .map(|s| s.state)
        .collect()
}

#[tokio::test]
async fn test_orchestrator_start_and_shutdown() {
    let orchestrator = EngineOrchestrator::new(create_test_config(3, None)).unwrap();
    orchestrator.initialize();
    assert_eq!(orchestrator.endpoint_state(), ComponentState::Idle);

    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.endpoint_state(), ComponentState::Started);
    assert_eq!(session_states(&orchestrator), vec![ComponentState::Started; 3]);

    let exit_code = orchestrator.shutdown(&ShutdownReason::UserRequest).await;
    assert_eq!(exit_code, 0);
    assert_eq!(orchestrator.endpoint_state(), ComponentState::Terminated);
    assert_eq!(session_states(&orchestrator), vec![ComponentState::Terminated; 3]);
    assert!(orchestrator.cancellation_token().is_cancelled());
}

#[tokio::test]
async fn test_failing_session_does_not_fail_endpoint() {
    let orchestrator = EngineOrchestrator::new(create_test_config(3, Some(1))).unwrap();
    orchestrator.initialize();
    orchestrator.start().await.unwrap();

    let snapshot = orchestrator.snapshot(0);
    assert_eq!(snapshot.endpoint.state, ComponentState::Started);
    let failed = &snapshot.endpoint.sessions[1];
    assert_eq!(failed.name, "session-1");
    assert_eq!(failed.state, ComponentState::Idle);
    assert!(failed.last_error.as_deref().unwrap().contains("establish dialog"));
    assert_eq!(snapshot.endpoint.sessions[0].steps_completed, 3);

    assert_eq!(orchestrator.shutdown(&ShutdownReason::UserRequest).await, 0);
    assert_eq!(session_states(&orchestrator), vec![ComponentState::Terminated; 3]);
}

#[tokio::test]
async fn test_run_returns_after_shutdown_request() {
    let mut orchestrator = EngineOrchestrator::new(create_test_config(1, None)).unwrap();
    orchestrator.initialize();
    orchestrator.start().await.unwrap();

    assert!(orchestrator.request_shutdown(ShutdownReason::UserRequest).await);
    assert!(!orchestrator.request_shutdown(ShutdownReason::UserRequest).await);

    let exit_code = orchestrator.run().await.unwrap();
    assert_eq!(exit_code, 0);
    assert_eq!(orchestrator.endpoint_state(), ComponentState::Terminated);

    assert!(matches!(orchestrator.run().await, Err(Error::System { .. })));
}

#[tokio::test]
async fn test_error_shutdown_reports_failure_exit_code() {
    let orchestrator = EngineOrchestrator::new(create_test_config(1, None)).unwrap();
    orchestrator.initialize();
    orchestrator.start().await.unwrap();

    let reason = ShutdownReason::Error("watchdog".to_string());
    assert_eq!(orchestrator.shutdown(&reason).await, 1);
    assert_eq!(orchestrator.snapshot(1).exit_code, 1);
}

#[tokio::test]
async fn test_startup_timeout_then_deferred_shutdown() {
    let mut config = create_test_config(1, None);
    config.lifecycle.startup_timeout_ms = 1;
    config.demo.step_delay_ms = 50;
    let orchestrator = EngineOrchestrator::new(config).unwrap();
    let mut receiver = orchestrator.event_bus().subscribe();
    orchestrator.initialize();

    match orchestrator.start().await {
        Err(Error::Engine(EngineError::Timeout { .. })) => {}
        other => panic!("expected startup timeout, got {:?}", other),
    }
    assert_eq!(orchestrator.endpoint_state(), ComponentState::Starting);

    // Shutdown cancels the in-flight startup, then tears everything down.
    assert_eq!(orchestrator.shutdown(&ShutdownReason::UserRequest).await, 0);
    assert_eq!(orchestrator.endpoint_state(), ComponentState::Terminated);

    let mut startup_error = None;
    while let Ok(event) = receiver.try_recv() {
        if let LifecycleEvent::SequenceCompleted {
            sequence, error, ..
        } = event
        {
            if sequence == "endpoint startup" {
                startup_error = error;
            }
        }
    }
    assert!(startup_error.unwrap().contains("cancelled"));
}

#[tokio::test]
async fn test_sessions_opened_while_running_start_and_close() {
    let orchestrator = EngineOrchestrator::new(create_test_config(0, None)).unwrap();
    orchestrator.start().await.unwrap();
    let endpoint = orchestrator.endpoint();

    let session = endpoint.open_session("late", false);
    let again = endpoint.open_session("late", false);
    assert!(std::sync::Arc::ptr_eq(&session, &again));
    assert_eq!(endpoint.session_count(), 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while session.lifecycle().state() != ComponentState::Started {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(endpoint.close_session("late").is_none());
    let closing = endpoint.close_session("late").unwrap();
    assert_eq!(closing.wait_async().await, Ok(()));
    assert_eq!(session.lifecycle().state(), ComponentState::Terminated);
    assert!(endpoint.session("late").is_none());

    orchestrator.shutdown(&ShutdownReason::UserRequest).await;
}

#[tokio::test]
async fn test_lifecycle_events_and_snapshot_json() {
    let orchestrator = EngineOrchestrator::new(create_test_config(2, None)).unwrap();
    let mut receiver = orchestrator.event_bus().subscribe();
    orchestrator.initialize();
    orchestrator.start().await.unwrap();

    let mut saw_startup_sequence = false;
    let mut endpoint_started = false;
    while let Ok(event) = receiver.try_recv() {
        match event {
            LifecycleEvent::SequenceCompleted {
                sequence, succeeded, ..
            } if sequence == "endpoint startup" => {
                saw_startup_sequence = succeeded;
            }
            LifecycleEvent::StateChanged { component, to, .. }
                if component == "endpoint" && to == ComponentState::Started =>
            {
                endpoint_started = true;
            }
            _ => {}
        }
    }
    assert!(saw_startup_sequence);
    assert!(endpoint_started);

    let json = serde_json::to_value(orchestrator.snapshot(0)).unwrap();
    assert_eq!(json["endpoint"]["state"], "started");
    assert_eq!(json["endpoint"]["sessions"].as_array().unwrap().len(), 2);
    assert_eq!(json["dispatcher"]["workers"], 2);

    orchestrator.shutdown(&ShutdownReason::UserRequest).await;
}
