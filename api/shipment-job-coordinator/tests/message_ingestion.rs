mod common;

use common::{MockEngine, create_job, runner_config, test_state, tx_hash};
use serde_json::json;
use shipment_job_coordinator::app::AppState;
use shipment_job_coordinator::module::async_job::crud;
use shipment_job_coordinator::module::async_job::schema::{JobState, MessageType};
use shipment_job_coordinator::service::lock_service::{ReleaseOutcome, wallet_lock_key};
use shipment_job_coordinator::service::message_service::{MessageEffect, ingest_message};
use shipment_job_coordinator::service::task_runner_service::{AsyncTask, RunOutcome};
use shipment_job_coordinator::service::wallet_lock_service::WalletLockManager;

async fn submitted_job(state: &AppState, wallet_id: &str) -> (String, String) {
    let job = create_job(state, "shipment-1", wallet_id, 0).await;
    let outcome = AsyncTask::load(state.clone(), &job.job_id, runner_config(state))
        .await
        .unwrap()
        .run()
        .await
        .unwrap();
    let RunOutcome::Submitted { transaction_hash } = outcome else {
        panic!("job was not submitted");
    };
    (job.job_id, transaction_hash)
}

#[tokio::test]
async fn repeated_eth_transaction_applies_once() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let (job_id, hash) = submitted_job(&state, "w").await;
    let body = json!({
        "transactionHash": hash,
        "blockHash": "0xblock",
        "blockNumber": "0x10",
        "gasUsed": 21000,
        "status": "0x1",
    });

    let first = ingest_message(&state, &job_id, MessageType::EthTransaction, body.clone())
        .await
        .unwrap();
    assert!(!first.duplicate);
    assert_eq!(first.state, JobState::Complete);
    assert!(first.effects.contains(&MessageEffect::StateChanged {
        from: JobState::Running,
        to: JobState::Complete,
    }));
    assert!(first.effects.contains(&MessageEffect::WalletLockReleased {
        wallet_id: "w".to_string(),
        outcome: ReleaseOutcome::Released,
    }));

    let second = ingest_message(&state, &job_id, MessageType::EthTransaction, body)
        .await
        .unwrap();
    assert!(second.duplicate);
    assert!(second.effects.is_empty());
    assert_eq!(second.state, JobState::Complete);

    let job = crud::get_async_job_record(&state, &job_id).await.unwrap();
    let states: Vec<JobState> = job.transitions.iter().map(|t| t.to_state).collect();
    assert_eq!(
        states,
        vec![JobState::Pending, JobState::Running, JobState::Complete]
    );
    assert!(job.wallet_lock_token.is_none());

    let receipt = crud::get_transaction_receipt(&state, &hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receipt.block_number, Some(16));
    assert_eq!(receipt.status, Some(true));
    // Fields from the send-time receipt survive the callback merge.
    assert!(receipt.from.is_some());

    let view = crud::get_async_job(&state, &job_id).await.unwrap().job.unwrap();
    assert_eq!(view.actions.len(), 1);
    assert_eq!(view.actions[0].receipt.as_ref().unwrap().block_number, Some(16));

    let messages = crud::list_job_messages(&state, &job_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(!messages[0].duplicate);
    assert!(messages[1].duplicate);
    assert!(!state.locks.is_held(&wallet_lock_key("w")).await.unwrap());
}

#[tokio::test]
async fn legacy_hash_key_is_accepted() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let (job_id, _) = submitted_job(&state, "w").await;

    let outcome = ingest_message(
        &state,
        &job_id,
        MessageType::EthTransaction,
        json!({"hash": format!("0x{:064X}", 1)}),
    )
    .await
    .unwrap();
    assert_eq!(outcome.state, JobState::Complete);
    assert!(crud::get_transaction_receipt(&state, &tx_hash(1))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn error_message_fails_job_and_frees_wallet() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let (job_id, _) = submitted_job(&state, "w").await;

    let outcome = ingest_message(
        &state,
        &job_id,
        MessageType::Error,
        json!({"message": "nonce too low"}),
    )
    .await
    .unwrap();
    assert_eq!(outcome.state, JobState::Failed);

    let job = crud::get_async_job_record(&state, &job_id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(
        job.transitions.last().unwrap().reason.as_deref(),
        Some("nonce too low")
    );
    assert!(job.wallet_lock_token.is_none());
    assert!(!state.locks.is_held(&wallet_lock_key("w")).await.unwrap());
}

#[tokio::test]
async fn expired_wallet_lock_is_tolerated() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let (job_id, hash) = submitted_job(&state, "w").await;
    let token = crud::get_async_job_record(&state, &job_id)
        .await
        .unwrap()
        .wallet_lock_token
        .unwrap();
    state
        .locks
        .release(&wallet_lock_key("w"), &token)
        .await
        .unwrap();

    let outcome = ingest_message(
        &state,
        &job_id,
        MessageType::EthTransaction,
        json!({"transactionHash": hash}),
    )
    .await
    .unwrap();
    assert_eq!(outcome.state, JobState::Complete);
    assert!(outcome.effects.contains(&MessageEffect::WalletLockReleased {
        wallet_id: "w".to_string(),
        outcome: ReleaseOutcome::NotHeld,
    }));
}

#[tokio::test]
async fn unknown_transaction_is_rejected() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let (job_id, _) = submitted_job(&state, "w").await;

    let err = ingest_message(
        &state,
        &job_id,
        MessageType::EthTransaction,
        json!({"transactionHash": tx_hash(999)}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, "ONCHAIN_ACTION_NOT_FOUND");

    let job = crud::get_async_job_record(&state, &job_id).await.unwrap();
    assert_eq!(job.state, JobState::Running);
}

#[tokio::test]
async fn complete_job_ignores_late_error() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let (job_id, hash) = submitted_job(&state, "w").await;
    ingest_message(
        &state,
        &job_id,
        MessageType::EthTransaction,
        json!({"transactionHash": hash}),
    )
    .await
    .unwrap();

    let outcome = ingest_message(&state, &job_id, MessageType::Error, json!("late failure"))
        .await
        .unwrap();
    assert_eq!(outcome.state, JobState::Complete);
    assert!(outcome.effects.is_empty());
}

#[tokio::test]
async fn error_before_submission_keeps_attempt_wallet_lock() {
    let engine = MockEngine::new();
    let state = test_state(&engine);
    let job = create_job(&state, "shipment-1", "w", 0).await;
    let wallets = WalletLockManager::new(
        state.locks.clone(),
        runner_config(&state).wallet_lock_timeout,
    );
    let token = wallets.acquire("w").await.unwrap().unwrap();
    crud::set_wallet_lock_token(&state, &job.job_id, Some(token.clone()))
        .await
        .unwrap();

    let outcome = ingest_message(&state, &job.job_id, MessageType::Error, json!("rejected"))
        .await
        .unwrap();
    assert_eq!(outcome.state, JobState::Failed);
    assert_eq!(
        outcome.effects,
        vec![MessageEffect::StateChanged {
            from: JobState::Pending,
            to: JobState::Failed,
        }]
    );

    let stored = crud::get_async_job_record(&state, &job.job_id).await.unwrap();
    assert_eq!(stored.wallet_lock_token, Some(token));
    assert!(wallets.is_locked("w").await.unwrap());
}
