mod common;

use common::{MockEngine, create_job, test_state};
use shipment_job_coordinator::module::async_job::crud;
use shipment_job_coordinator::module::async_job::schema::JobState;
use shipment_job_coordinator::service::dispatch_service::{FireOutcome, JobDispatcher};
use shipment_job_coordinator::service::lock_service::{task_lock_key, wallet_lock_key};
use shipment_job_coordinator::service::queue_service::{local_queue_snapshot, process_next};
use shipment_job_coordinator::service::rpc_gateway_service::RpcError;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn concurrent_fires_of_one_job_run_the_task_once() {
    let engine = MockEngine::new();
    engine.set_build_delay(Duration::from_millis(100));
    let state = test_state(&engine);
    let job = create_job(&state, "shipment-1", "w", 0).await;
    let dispatcher = JobDispatcher::from_state(&state);

    let (first, second) = tokio::join!(
        dispatcher.fire(&job.job_id, 0),
        dispatcher.fire(&job.job_id, 0)
    );

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, FireOutcome::Submitted { .. }))
            .count(),
        1
    );
    assert!(outcomes.contains(&FireOutcome::AlreadyDispatched));
    assert_eq!(engine.build_calls.load(Ordering::SeqCst), 1);
    assert!(!state.locks.is_held(&task_lock_key(&job.job_id)).await.unwrap());
}

#[tokio::test]
async fn busy_wallet_defers_with_jitter() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let job = create_job(&state, "shipment-1", "w", 0).await;
    state
        .locks
        .try_acquire(&wallet_lock_key("w"), Duration::from_secs(60))
        .await
        .unwrap()
        .expect("lock taken by another job");

    let outcome = JobDispatcher::from_state(&state).fire(&job.job_id, 0).await;
    match outcome {
        FireOutcome::RetryScheduled { delay_seconds, .. } => {
            assert!((15..=45).contains(&delay_seconds), "delay {delay_seconds}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let stored = crud::get_async_job_record(&state, &job.job_id).await.unwrap();
    assert_eq!(stored.state, JobState::Pending);
    assert_eq!(engine.build_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhausted_retries_mark_job_failed() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let job = create_job(&state, "shipment-1", "w", 0).await;
    state
        .locks
        .try_acquire(&wallet_lock_key("w"), Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let outcome = JobDispatcher::from_state(&state).fire(&job.job_id, 3).await;
    assert!(matches!(outcome, FireOutcome::Failed { .. }));

    let stored = crud::get_async_job_record(&state, &job.job_id).await.unwrap();
    assert_eq!(stored.state, JobState::Failed);
    let last = stored.transitions.last().unwrap();
    assert_eq!(last.from_state, Some(JobState::Pending));
    assert!(last.reason.as_deref().unwrap_or_default().contains("in use"));
    assert!(!state.locks.is_held(&task_lock_key(&job.job_id)).await.unwrap());
}

#[tokio::test]
async fn engine_errors_back_off_without_a_ceiling() {
    let engine = MockEngine::new();
    engine.fail_sign(RpcError::ServiceUnavailable("connection refused".to_string()));
    let state = test_state(&engine);
    let job = create_job(&state, "shipment-1", "w", 0).await;

    let outcome = JobDispatcher::from_state(&state).fire(&job.job_id, 50).await;
    match outcome {
        FireOutcome::RetryScheduled { delay_seconds, .. } => assert_eq!(delay_seconds, 60),
        other => panic!("unexpected outcome {other:?}"),
    }
    let stored = crud::get_async_job_record(&state, &job.job_id).await.unwrap();
    assert_eq!(stored.state, JobState::Pending);
    assert!(!state.locks.is_held(&wallet_lock_key("w")).await.unwrap());
}

#[tokio::test]
async fn vanished_job_is_dropped() {
    let engine = MockEngine::new();
    let state = test_state(&engine);

    let outcome = JobDispatcher::from_state(&state)
        .fire("asyncjob-missing", 0)
        .await;
    assert!(matches!(outcome, FireOutcome::Dropped { .. }));
    assert!(!state.locks.is_held(&task_lock_key("asyncjob-missing")).await.unwrap());
}

#[tokio::test]
async fn worker_step_runs_queued_job() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let job = create_job(&state, "shipment-1", "w", 0).await;

    let (job_id, outcome) = process_next(&state).await.unwrap().expect("job was queued");
    assert_eq!(job_id, job.job_id);
    assert!(matches!(outcome, FireOutcome::Submitted { .. }));
    assert!(process_next(&state).await.unwrap().is_none());
}

#[tokio::test]
async fn worker_reschedules_deferred_job() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let job = create_job(&state, "shipment-1", "w", 0).await;
    state
        .locks
        .try_acquire(&wallet_lock_key("w"), Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let (_, outcome) = process_next(&state).await.unwrap().unwrap();
    assert!(matches!(outcome, FireOutcome::RetryScheduled { .. }));

    let snapshot = local_queue_snapshot(&state).unwrap();
    assert!(snapshot.ready.is_empty());
    assert!(snapshot.scheduled.iter().any(|(_, id)| id == &job.job_id));
}

#[tokio::test]
async fn delayed_job_waits_for_its_window() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let job = create_job(&state, "shipment-1", "w", 5).await;

    assert!(process_next(&state).await.unwrap().is_none());
    let snapshot = local_queue_snapshot(&state).unwrap();
    let (due_at, id) = snapshot.scheduled.first().cloned().expect("scheduled");
    assert_eq!(id, job.job_id);
    assert!(due_at >= job.created_at + 300);
    assert_eq!(engine.build_calls.load(Ordering::SeqCst), 0);
}
