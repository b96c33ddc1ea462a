//! Engine callback handling.
//!
//! Each delivery returns the effects it applied as [`MessageEffect`] values
//! instead of triggering them from store hooks. A repeated `ETH_TRANSACTION`
//! for a hash the job already saw applies nothing.

use crate::app::AppState;
use crate::config::jobs::TaskRunnerConfig;
use crate::module::async_job::crud::{self, TransitionOutcome};
use crate::module::async_job::error::AppError;
use crate::module::async_job::model::{AsyncJobRecord, MessageRecord, TransactionReceiptRecord};
use crate::module::async_job::schema::{JobState, MessageType};
use crate::service::hash_service::normalize_tx_hash;
use crate::service::lock_service::ReleaseOutcome;
use crate::service::metrics_service;
use crate::service::wallet_lock_service::WalletLockManager;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Body keys carrying the transaction hash, canonical first.
const TX_HASH_KEYS: [&str; 2] = ["transactionHash", "hash"];

#[derive(Debug, Clone, PartialEq)]
pub enum MessageEffect {
    ReceiptStored {
        transaction_hash: String,
        created: bool,
    },
    StateChanged {
        from: JobState,
        to: JobState,
    },
    WalletLockReleased {
        wallet_id: String,
        outcome: ReleaseOutcome,
    },
}

#[derive(Debug, Clone)]
pub struct MessageOutcome {
    pub job_id: String,
    pub message_id: String,
    pub duplicate: bool,
    pub state: JobState,
    pub effects: Vec<MessageEffect>,
}

pub async fn ingest_message(
    state: &AppState,
    job_id: &str,
    message_type: MessageType,
    body: Value,
) -> Result<MessageOutcome, AppError> {
    let job = crud::get_async_job_record(state, job_id).await?;
    match message_type {
        MessageType::EthTransaction => ingest_eth_transaction(state, job, body).await,
        MessageType::Error => ingest_error(state, job, body).await,
    }
}

pub fn transaction_hash_from_body(body: &Value) -> Option<&str> {
    TX_HASH_KEYS
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

async fn ingest_eth_transaction(
    state: &AppState,
    job: AsyncJobRecord,
    body: Value,
) -> Result<MessageOutcome, AppError> {
    let raw_hash = transaction_hash_from_body(&body).ok_or_else(|| {
        AppError::bad_request(
            "MISSING_TRANSACTION_HASH",
            "ETH_TRANSACTION body needs transactionHash",
        )
    })?;
    let hash = normalize_tx_hash(raw_hash)
        .map_err(|e| AppError::bad_request("INVALID_TRANSACTION_HASH", e))?;

    let action = crud::get_onchain_action(state, &hash).await?.ok_or_else(|| {
        AppError::not_found(
            "ONCHAIN_ACTION_NOT_FOUND",
            format!("no transaction {hash} recorded"),
        )
    })?;
    if action.job_id != job.job_id {
        return Err(AppError::bad_request(
            "TRANSACTION_JOB_MISMATCH",
            format!("transaction {hash} belongs to another job"),
        ));
    }

    if crud::has_eth_message(state, &job.job_id, &hash).await? {
        metrics_service::inc_duplicate_messages();
        info!(job_id = %job.job_id, transaction_hash = %hash, "duplicate ETH_TRANSACTION ignored");
        let message_id = store_message(
            state,
            &job.job_id,
            MessageType::EthTransaction,
            body,
            Some(hash),
            true,
        )
        .await?;
        return Ok(MessageOutcome {
            job_id: job.job_id,
            message_id,
            duplicate: true,
            state: job.state,
            effects: Vec::new(),
        });
    }

    let mut effects = Vec::new();
    let created = crud::upsert_transaction_receipt(
        state,
        TransactionReceiptRecord::from_engine(&hash, &body, Utc::now().timestamp()),
    )
    .await?;
    effects.push(MessageEffect::ReceiptStored {
        transaction_hash: hash.clone(),
        created,
    });

    let transition =
        crud::transition_job_state(state, &job.job_id, JobState::Complete, None).await?;
    if transition.applied {
        metrics_service::inc_jobs_completed();
        effects.push(MessageEffect::StateChanged {
            from: transition.from_state,
            to: JobState::Complete,
        });
    }
    let job_state = transition.job.state;
    release_wallet(state, &transition, &mut effects).await?;

    let message_id = store_message(
        state,
        &job.job_id,
        MessageType::EthTransaction,
        body,
        Some(hash.clone()),
        false,
    )
    .await?;
    info!(job_id = %job.job_id, transaction_hash = %hash, state = job_state.as_str(), "transaction confirmed");
    Ok(MessageOutcome {
        job_id: job.job_id,
        message_id,
        duplicate: false,
        state: job_state,
        effects,
    })
}

async fn ingest_error(
    state: &AppState,
    job: AsyncJobRecord,
    body: Value,
) -> Result<MessageOutcome, AppError> {
    let reason = error_reason(&body);
    error!(job_id = %job.job_id, shipment_id = %job.shipment_id, error_body = %body, "engine reported job failure");
    metrics_service::set_last_error_ts(Utc::now().timestamp());

    let mut effects = Vec::new();
    let transition =
        crud::transition_job_state(state, &job.job_id, JobState::Failed, Some(reason)).await?;
    if transition.applied {
        metrics_service::inc_jobs_failed();
        effects.push(MessageEffect::StateChanged {
            from: transition.from_state,
            to: JobState::Failed,
        });
    }
    let job_state = transition.job.state;
    release_wallet(state, &transition, &mut effects).await?;

    let message_id =
        store_message(state, &job.job_id, MessageType::Error, body, None, false).await?;
    Ok(MessageOutcome {
        job_id: job.job_id,
        message_id,
        duplicate: false,
        state: job_state,
        effects,
    })
}

/// Frees the wallet of a job whose attempt already reached RUNNING.
///
/// Before RUNNING the token belongs to an attempt still in flight, which
/// releases the wallet itself once it sees the job moved on.
async fn release_wallet(
    state: &AppState,
    transition: &TransitionOutcome,
    effects: &mut Vec<MessageEffect>,
) -> Result<(), AppError> {
    let job = &transition.job;
    if transition.from_state != JobState::Running {
        debug!(job_id = %job.job_id, from_state = transition.from_state.as_str(), "wallet lock left to the running attempt");
        return Ok(());
    }
    let Some(token) = &job.wallet_lock_token else {
        debug!(job_id = %job.job_id, "no wallet lock token recorded");
        return Ok(());
    };
    let wallet_id = &job.parameters.signing_wallet_id;
    let wallets = WalletLockManager::new(
        state.locks.clone(),
        TaskRunnerConfig::from_app(&state.config).wallet_lock_timeout,
    );
    let outcome = wallets.release(wallet_id, token).await;
    effects.push(MessageEffect::WalletLockReleased {
        wallet_id: wallet_id.clone(),
        outcome,
    });
    crud::set_wallet_lock_token(state, &job.job_id, None).await?;
    Ok(())
}

async fn store_message(
    state: &AppState,
    job_id: &str,
    message_type: MessageType,
    body: Value,
    transaction_hash: Option<String>,
    duplicate: bool,
) -> Result<String, AppError> {
    let message_id = format!("msg-{}", Uuid::new_v4());
    crud::record_message(
        state,
        MessageRecord {
            message_id: message_id.clone(),
            job_id: job_id.to_string(),
            message_type,
            body,
            transaction_hash,
            duplicate,
            created_at: Utc::now().timestamp(),
        },
    )
    .await?;
    Ok(message_id)
}

fn error_reason(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        Value::Object(map) => ["message", "error", "reason"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| body.to_string()),
        Value::Null => "engine reported an error".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_key_wins_over_alias() {
        let body = json!({"transactionHash": "0xaa", "hash": "0xbb"});
        assert_eq!(transaction_hash_from_body(&body), Some("0xaa"));
        assert_eq!(transaction_hash_from_body(&json!({"hash": "0xbb"})), Some("0xbb"));
        assert_eq!(transaction_hash_from_body(&json!({"hash": ""})), None);
    }

    #[test]
    fn error_reason_prefers_message_field() {
        assert_eq!(error_reason(&json!({"message": "nonce too low", "code": 3})), "nonce too low");
        assert_eq!(error_reason(&json!("boom")), "boom");
        assert_eq!(error_reason(&json!({"code": 3})), r#"{"code":3}"#);
    }
}
