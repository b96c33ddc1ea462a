use super::error::AppError;
use super::model::{
    AsyncJobRecord, MessageRecord, NewAsyncJob, OnChainActionRecord, ShipmentRecord,
    TransactionReceiptRecord,
};
use super::schema::{
    AsyncJobView, GetAsyncJobResponse, GetShipmentJobsResponse, JobState, JobStateTransition,
    MessageType, OnChainActionView, TransactionReceiptView,
};
use crate::app::AppState;
use crate::infra::{
    ASYNC_JOB_TRANSITIONS_COLLECTION, ASYNC_JOBS_COLLECTION, InfraClients,
    JOB_MESSAGES_COLLECTION, ONCHAIN_ACTIONS_COLLECTION, SHIPMENTS_COLLECTION,
    TRANSACTION_RECEIPTS_COLLECTION,
};
use crate::service::hash_service::sha256_hex;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

const UPDATE_MAX_ATTEMPTS: u32 = 8;

/// Process-local view of the job tables.
///
/// Without Redis this is the only copy. With Redis configured every write is
/// mirrored there and reads go to Redis first, so API and worker processes
/// observe each other's updates.
#[derive(Debug, Default)]
pub struct AsyncJobStore {
    inner: Mutex<AsyncJobStoreInner>,
}

#[derive(Debug, Default)]
struct AsyncJobStoreInner {
    jobs_by_id: HashMap<String, AsyncJobRecord>,
    job_ids_by_shipment: HashMap<String, Vec<String>>,
    actions_by_hash: HashMap<String, OnChainActionRecord>,
    receipts_by_hash: HashMap<String, TransactionReceiptRecord>,
    messages_by_job: HashMap<String, Vec<MessageRecord>>,
    seen_eth_messages: HashSet<String>,
    shipments_by_id: HashMap<String, ShipmentRecord>,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub job: AsyncJobRecord,
    pub from_state: JobState,
    pub applied: bool,
}

pub async fn create_async_job(
    state: &AppState,
    new_job: NewAsyncJob,
) -> Result<AsyncJobRecord, AppError> {
    let now = Utc::now().timestamp();
    let job = AsyncJobRecord {
        job_id: generate_job_id(),
        shipment_id: new_job.shipment_id,
        state: JobState::Pending,
        parameters: new_job.parameters,
        last_try: None,
        delay_minutes: new_job.delay_minutes.max(0),
        wallet_lock_token: None,
        created_at: now,
        updated_at: now,
        transitions: vec![JobStateTransition {
            from_state: None,
            to_state: JobState::Pending,
            transitioned_at: now,
            reason: None,
        }],
    };

    warm_job_in_memory(state, &job)?;
    persist_job(state, &job).await?;
    if let Some(infra) = &state.infra {
        let mut conn = connect(infra).await?;
        let _: usize = conn
            .sadd(shipment_jobs_key(&job.shipment_id), &job.job_id)
            .await
            .map_err(|e| AppError::internal("REDIS_WRITE_FAILED", e.to_string()))?;
    }
    persist_transition(state, &job.job_id, None, JobState::Pending, None).await?;
    Ok(job)
}

pub async fn get_async_job(state: &AppState, job_id: &str) -> Result<GetAsyncJobResponse, AppError> {
    match get_async_job_record(state, job_id).await {
        Ok(job) => Ok(GetAsyncJobResponse {
            found: true,
            job: Some(to_view(state, &job).await?),
            error_code: None,
            reason: "async job found".to_string(),
        }),
        Err(err) if err.is_not_found() => Ok(GetAsyncJobResponse {
            found: false,
            job: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
        Err(err) => Err(err),
    }
}

pub async fn get_async_job_record(
    state: &AppState,
    job_id: &str,
) -> Result<AsyncJobRecord, AppError> {
    if let Some(infra) = &state.infra {
        let job = load_json::<AsyncJobRecord>(infra, &job_key(job_id))
            .await?
            .ok_or_else(job_not_found)?;
        warm_job_in_memory(state, &job)?;
        return Ok(job);
    }
    let inner = lock_store(state)?;
    inner.jobs_by_id.get(job_id).cloned().ok_or_else(job_not_found)
}

pub async fn get_shipment_jobs(
    state: &AppState,
    shipment_id: &str,
) -> Result<GetShipmentJobsResponse, AppError> {
    if shipment_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "INVALID_SHIPMENT_ID",
            "shipment_id is required",
        ));
    }
    let records = list_shipment_jobs(state, shipment_id).await?;
    let mut jobs = Vec::with_capacity(records.len());
    for job in &records {
        jobs.push(to_view(state, job).await?);
    }
    let found = !jobs.is_empty();
    Ok(GetShipmentJobsResponse {
        found,
        shipment_id: shipment_id.to_string(),
        jobs,
        error_code: None,
        reason: if found {
            "async jobs found".to_string()
        } else {
            "no async jobs found for shipment".to_string()
        },
    })
}

pub async fn list_shipment_jobs(
    state: &AppState,
    shipment_id: &str,
) -> Result<Vec<AsyncJobRecord>, AppError> {
    let mut jobs = if let Some(infra) = &state.infra {
        let mut conn = connect(infra).await?;
        let job_ids: Vec<String> = conn
            .smembers(shipment_jobs_key(shipment_id))
            .await
            .map_err(|e| AppError::internal("REDIS_QUERY_FAILED", e.to_string()))?;
        let mut jobs = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if let Some(job) = load_json::<AsyncJobRecord>(infra, &job_key(&job_id)).await? {
                jobs.push(job);
            }
        }
        jobs
    } else {
        let inner = lock_store(state)?;
        inner
            .job_ids_by_shipment
            .get(shipment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.jobs_by_id.get(id).cloned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    };
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(jobs)
}

/// Pending jobs of one shipment that sign with `signing_wallet_id` and call `rpc_method`.
pub async fn list_pending_jobs(
    state: &AppState,
    shipment_id: &str,
    signing_wallet_id: &str,
    rpc_method: &str,
) -> Result<Vec<AsyncJobRecord>, AppError> {
    Ok(list_shipment_jobs(state, shipment_id)
        .await?
        .into_iter()
        .filter(|j| {
            j.state == JobState::Pending
                && j.parameters.signing_wallet_id == signing_wallet_id
                && j.parameters.rpc_method == rpc_method
        })
        .collect())
}

pub async fn record_last_try(
    state: &AppState,
    job_id: &str,
    now: i64,
) -> Result<AsyncJobRecord, AppError> {
    mutate_job(state, job_id, |job| {
        job.last_try = Some(now);
        Ok(true)
    })
    .await
}

pub async fn set_wallet_lock_token(
    state: &AppState,
    job_id: &str,
    token: Option<String>,
) -> Result<AsyncJobRecord, AppError> {
    mutate_job(state, job_id, |job| {
        if job.wallet_lock_token == token {
            return Ok(false);
        }
        job.wallet_lock_token = token.clone();
        Ok(true)
    })
    .await
}

pub async fn set_signed_tx(
    state: &AppState,
    job_id: &str,
    signed_tx: Value,
) -> Result<AsyncJobRecord, AppError> {
    mutate_job(state, job_id, |job| {
        job.parameters.signed_tx = Some(signed_tx.clone());
        Ok(true)
    })
    .await
}

/// Overwrites one positional rpc parameter, padding with nulls when short.
pub async fn set_rpc_parameter(
    state: &AppState,
    job_id: &str,
    index: usize,
    value: Value,
) -> Result<AsyncJobRecord, AppError> {
    mutate_job(state, job_id, |job| {
        let params = &mut job.parameters.rpc_parameters;
        if params.len() <= index {
            params.resize(index + 1, Value::Null);
        }
        if params[index] == value {
            return Ok(false);
        }
        params[index] = value.clone();
        Ok(true)
    })
    .await
}

pub async fn transition_job_state(
    state: &AppState,
    job_id: &str,
    next_state: JobState,
    reason: Option<String>,
) -> Result<TransitionOutcome, AppError> {
    apply_transition(state, job_id, None, next_state, reason).await
}

/// Like [`transition_job_state`], but only when the job is still in `expected`.
///
/// A job that moved on in the meantime is left alone and reported with
/// `applied: false` and its current state in `from_state`.
pub async fn transition_job_state_from(
    state: &AppState,
    job_id: &str,
    expected: JobState,
    next_state: JobState,
    reason: Option<String>,
) -> Result<TransitionOutcome, AppError> {
    apply_transition(state, job_id, Some(expected), next_state, reason).await
}

async fn apply_transition(
    state: &AppState,
    job_id: &str,
    expected: Option<JobState>,
    next_state: JobState,
    reason: Option<String>,
) -> Result<TransitionOutcome, AppError> {
    let now = Utc::now().timestamp();
    let mut from_state = JobState::Pending;
    let mut applied = false;
    let job = mutate_job(state, job_id, |job| {
        from_state = job.state;
        applied = false;
        if expected.is_some_and(|e| e != job.state) {
            return Ok(false);
        }
        if job.state == next_state || job.state == JobState::Complete {
            return Ok(false);
        }
        if !is_valid_transition(job.state, next_state) {
            return Err(AppError::conflict(
                "INVALID_STATE_TRANSITION",
                format!(
                    "cannot transition from {} to {}",
                    job.state.as_str(),
                    next_state.as_str()
                ),
            ));
        }
        job.state = next_state;
        job.transitions.push(JobStateTransition {
            from_state: Some(from_state),
            to_state: next_state,
            transitioned_at: now,
            reason: reason.clone(),
        });
        applied = true;
        Ok(true)
    })
    .await?;

    if applied {
        persist_transition(state, job_id, Some(from_state), next_state, reason).await?;
    } else if expected.is_some_and(|e| e != from_state) {
        warn!(
            job_id = %job_id,
            expected = expected.map(|e| e.as_str()),
            current = from_state.as_str(),
            requested = next_state.as_str(),
            "job changed state concurrently; transition skipped"
        );
    } else if from_state == JobState::Complete && next_state != JobState::Complete {
        warn!(
            job_id = %job_id,
            requested = next_state.as_str(),
            "ignoring transition out of terminal COMPLETE"
        );
    }

    Ok(TransitionOutcome {
        job,
        from_state,
        applied,
    })
}

/// Get-or-create keyed by transaction hash. Returns `false` when the hash is taken.
pub async fn create_onchain_action(
    state: &AppState,
    action: OnChainActionRecord,
) -> Result<bool, AppError> {
    if let Some(infra) = &state.infra {
        let created = persist_json_nx(infra, &action_key(&action.transaction_hash), &action).await?;
        if created {
            let mut conn = connect(infra).await?;
            let _: usize = conn
                .sadd(job_actions_key(&action.job_id), &action.transaction_hash)
                .await
                .map_err(|e| AppError::internal("REDIS_WRITE_FAILED", e.to_string()))?;
            let mut inner = lock_store(state)?;
            inner
                .actions_by_hash
                .insert(action.transaction_hash.clone(), action);
        }
        return Ok(created);
    }

    let mut inner = lock_store(state)?;
    if inner.actions_by_hash.contains_key(&action.transaction_hash) {
        return Ok(false);
    }
    inner
        .actions_by_hash
        .insert(action.transaction_hash.clone(), action);
    Ok(true)
}

pub async fn get_onchain_action(
    state: &AppState,
    transaction_hash: &str,
) -> Result<Option<OnChainActionRecord>, AppError> {
    if let Some(infra) = &state.infra {
        return load_json(infra, &action_key(transaction_hash)).await;
    }
    let inner = lock_store(state)?;
    Ok(inner.actions_by_hash.get(transaction_hash).cloned())
}

pub async fn list_job_actions(
    state: &AppState,
    job_id: &str,
) -> Result<Vec<OnChainActionRecord>, AppError> {
    let mut actions = if let Some(infra) = &state.infra {
        let mut conn = connect(infra).await?;
        let hashes: Vec<String> = conn
            .smembers(job_actions_key(job_id))
            .await
            .map_err(|e| AppError::internal("REDIS_QUERY_FAILED", e.to_string()))?;
        let mut actions = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(action) = load_json::<OnChainActionRecord>(infra, &action_key(&hash)).await? {
                actions.push(action);
            }
        }
        actions
    } else {
        let inner = lock_store(state)?;
        inner
            .actions_by_hash
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect::<Vec<_>>()
    };
    actions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(actions)
}

pub async fn attach_send_receipt(
    state: &AppState,
    transaction_hash: &str,
    receipt: Value,
) -> Result<OnChainActionRecord, AppError> {
    let now = Utc::now().timestamp();
    if let Some(infra) = &state.infra {
        return update_json(
            infra,
            &action_key(transaction_hash),
            |current: Option<OnChainActionRecord>| {
                let mut action = current.ok_or_else(action_not_found)?;
                action.send_receipt = Some(receipt.clone());
                action.updated_at = now;
                Ok((action, true))
            },
        )
        .await;
    }

    let mut inner = lock_store(state)?;
    let action = inner
        .actions_by_hash
        .get_mut(transaction_hash)
        .ok_or_else(action_not_found)?;
    action.send_receipt = Some(receipt);
    action.updated_at = now;
    Ok(action.clone())
}

/// Upsert keyed by transaction hash. Returns `true` when the receipt row was created.
pub async fn upsert_transaction_receipt(
    state: &AppState,
    receipt: TransactionReceiptRecord,
) -> Result<bool, AppError> {
    let key = receipt_key(&receipt.transaction_hash);
    if let Some(infra) = &state.infra {
        let mut created = false;
        update_json(infra, &key, |existing: Option<TransactionReceiptRecord>| {
            created = existing.is_none();
            let record = match existing {
                Some(mut current) => {
                    current.merge(receipt.clone());
                    current
                }
                None => receipt.clone(),
            };
            Ok((record, true))
        })
        .await?;
        return Ok(created);
    }

    let mut inner = lock_store(state)?;
    match inner.receipts_by_hash.get_mut(&receipt.transaction_hash) {
        Some(current) => {
            current.merge(receipt);
            Ok(false)
        }
        None => {
            inner
                .receipts_by_hash
                .insert(receipt.transaction_hash.clone(), receipt);
            Ok(true)
        }
    }
}

pub async fn get_transaction_receipt(
    state: &AppState,
    transaction_hash: &str,
) -> Result<Option<TransactionReceiptRecord>, AppError> {
    if let Some(infra) = &state.infra {
        return load_json(infra, &receipt_key(transaction_hash)).await;
    }
    let inner = lock_store(state)?;
    Ok(inner.receipts_by_hash.get(transaction_hash).cloned())
}

pub async fn has_eth_message(
    state: &AppState,
    job_id: &str,
    transaction_hash: &str,
) -> Result<bool, AppError> {
    if let Some(infra) = &state.infra {
        let mut conn = connect(infra).await?;
        return conn
            .exists(eth_message_key(job_id, transaction_hash))
            .await
            .map_err(|e| AppError::internal("REDIS_QUERY_FAILED", e.to_string()));
    }
    let inner = lock_store(state)?;
    Ok(inner
        .seen_eth_messages
        .contains(&eth_message_key(job_id, transaction_hash)))
}

pub async fn record_message(state: &AppState, message: MessageRecord) -> Result<(), AppError> {
    let seen_key = match (&message.message_type, &message.transaction_hash) {
        (MessageType::EthTransaction, Some(hash)) => Some(eth_message_key(&message.job_id, hash)),
        _ => None,
    };

    if let Some(infra) = &state.infra {
        let mut conn = connect(infra).await?;
        let payload = serde_json::to_string(&message)
            .map_err(|e| AppError::internal("SERIALIZATION_ERROR", e.to_string()))?;
        let _: usize = conn
            .lpush(messages_key(&message.job_id), payload)
            .await
            .map_err(|e| AppError::internal("REDIS_WRITE_FAILED", e.to_string()))?;
        if let Some(key) = &seen_key {
            let _: () = conn
                .set(key, &message.message_id)
                .await
                .map_err(|e| AppError::internal("REDIS_WRITE_FAILED", e.to_string()))?;
        }
    }

    let mut inner = lock_store(state)?;
    if let Some(key) = seen_key {
        inner.seen_eth_messages.insert(key);
    }
    inner
        .messages_by_job
        .entry(message.job_id.clone())
        .or_default()
        .push(message);
    Ok(())
}

pub async fn list_job_messages(
    state: &AppState,
    job_id: &str,
) -> Result<Vec<MessageRecord>, AppError> {
    if let Some(infra) = &state.infra {
        let mut conn = connect(infra).await?;
        let raw: Vec<String> = conn
            .lrange(messages_key(job_id), 0, -1)
            .await
            .map_err(|e| AppError::internal("REDIS_QUERY_FAILED", e.to_string()))?;
        let mut messages = raw
            .iter()
            .map(|s| serde_json::from_str::<MessageRecord>(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::internal("REDIS_DECODE_FAILED", e.to_string()))?;
        messages.reverse();
        return Ok(messages);
    }
    let inner = lock_store(state)?;
    Ok(inner.messages_by_job.get(job_id).cloned().unwrap_or_default())
}

pub async fn set_contract_version(
    state: &AppState,
    shipment_id: &str,
    contract_version: &str,
) -> Result<ShipmentRecord, AppError> {
    let record = ShipmentRecord {
        shipment_id: shipment_id.to_string(),
        contract_version: Some(contract_version.to_string()),
        updated_at: Utc::now().timestamp(),
    };
    if let Some(infra) = &state.infra {
        persist_json(infra, &shipment_key(shipment_id), &record).await?;
    }
    let mut inner = lock_store(state)?;
    inner
        .shipments_by_id
        .insert(shipment_id.to_string(), record.clone());
    Ok(record)
}

pub async fn get_shipment(
    state: &AppState,
    shipment_id: &str,
) -> Result<Option<ShipmentRecord>, AppError> {
    if let Some(infra) = &state.infra {
        return load_json(infra, &shipment_key(shipment_id)).await;
    }
    let inner = lock_store(state)?;
    Ok(inner.shipments_by_id.get(shipment_id).cloned())
}

fn is_valid_transition(from: JobState, to: JobState) -> bool {
    matches!(
        (from, to),
        (JobState::Pending, JobState::Running)
            | (JobState::Failed, JobState::Running)
            | (JobState::Pending, JobState::Complete)
            | (JobState::Running, JobState::Complete)
            | (JobState::Failed, JobState::Complete)
            | (JobState::Pending, JobState::Failed)
            | (JobState::Running, JobState::Failed)
    )
}

/// Applies `f` to the current job and stores the result when `f` reports a change.
///
/// With Redis, `f` may run more than once: the write is retried whenever
/// another process updated the job between read and write.
async fn mutate_job<F>(state: &AppState, job_id: &str, mut f: F) -> Result<AsyncJobRecord, AppError>
where
    F: FnMut(&mut AsyncJobRecord) -> Result<bool, AppError>,
{
    let now = Utc::now().timestamp();
    let Some(infra) = &state.infra else {
        let mut inner = lock_store(state)?;
        let job = inner.jobs_by_id.get_mut(job_id).ok_or_else(job_not_found)?;
        if f(job)? {
            job.updated_at = now;
        }
        return Ok(job.clone());
    };

    let job = update_json(infra, &job_key(job_id), |current: Option<AsyncJobRecord>| {
        let mut job = current.ok_or_else(job_not_found)?;
        let changed = f(&mut job)?;
        if changed {
            job.updated_at = now;
        }
        Ok((job, changed))
    })
    .await?;
    warm_job_in_memory(state, &job)?;
    Ok(job)
}

async fn to_view(state: &AppState, job: &AsyncJobRecord) -> Result<AsyncJobView, AppError> {
    let mut actions = Vec::new();
    for action in list_job_actions(state, &job.job_id).await? {
        let receipt = get_transaction_receipt(state, &action.transaction_hash)
            .await?
            .map(|r| TransactionReceiptView {
                transaction_hash: r.transaction_hash,
                block_hash: r.block_hash,
                block_number: r.block_number,
                gas_used: r.gas_used,
                status: r.status,
                updated_at: r.updated_at,
            });
        actions.push(OnChainActionView {
            transaction_hash: action.transaction_hash,
            created_at: action.created_at,
            updated_at: action.updated_at,
            receipt,
        });
    }
    Ok(AsyncJobView {
        job_id: job.job_id.clone(),
        shipment_id: job.shipment_id.clone(),
        state: job.state,
        rpc_method: job.parameters.rpc_method.clone(),
        signing_wallet_id: job.parameters.signing_wallet_id.clone(),
        delay_minutes: job.delay_minutes,
        last_try: job.last_try,
        created_at: job.created_at,
        updated_at: job.updated_at,
        actions,
        transitions: job.transitions.clone(),
    })
}

fn generate_job_id() -> String {
    format!("asyncjob-{}", Uuid::new_v4())
}

fn job_not_found() -> AppError {
    AppError::not_found("JOB_NOT_FOUND", "async job not found")
}

fn action_not_found() -> AppError {
    AppError::not_found("ACTION_NOT_FOUND", "onchain action not found")
}

fn lock_store(state: &AppState) -> Result<MutexGuard<'_, AsyncJobStoreInner>, AppError> {
    state
        .store
        .inner
        .lock()
        .map_err(|_| AppError::internal("STORE_LOCK_ERROR", "async job store lock poisoned"))
}

fn warm_job_in_memory(state: &AppState, job: &AsyncJobRecord) -> Result<(), AppError> {
    let mut inner = lock_store(state)?;
    let ids = inner
        .job_ids_by_shipment
        .entry(job.shipment_id.clone())
        .or_default();
    if !ids.contains(&job.job_id) {
        ids.push(job.job_id.clone());
    }
    inner.jobs_by_id.insert(job.job_id.clone(), job.clone());
    Ok(())
}

async fn persist_job(state: &AppState, job: &AsyncJobRecord) -> Result<(), AppError> {
    let Some(infra) = &state.infra else {
        return Ok(());
    };
    persist_json(infra, &job_key(&job.job_id), job).await
}

async fn persist_transition(
    state: &AppState,
    job_id: &str,
    from_state: Option<JobState>,
    to_state: JobState,
    reason: Option<String>,
) -> Result<(), AppError> {
    let Some(infra) = &state.infra else {
        return Ok(());
    };
    let mut conn = connect(infra).await?;
    let now = Utc::now().timestamp();
    let from_str = from_state.map(|s| s.as_str().to_string());
    let record = json!({
        "job_id": job_id,
        "from_state": from_str,
        "to_state": to_state.as_str(),
        "transitioned_at": now,
        "reason": reason,
        "evidence_hash": sha256_hex(&format!("{job_id}:{now}:{:?}:{:?}", from_state, to_state)),
    });
    let payload = serde_json::to_string(&record)
        .map_err(|e| AppError::internal("SERIALIZATION_ERROR", e.to_string()))?;
    let _: usize = conn
        .lpush(format!("{ASYNC_JOB_TRANSITIONS_COLLECTION}:{job_id}"), payload)
        .await
        .map_err(|e| AppError::internal("REDIS_WRITE_FAILED", e.to_string()))?;
    Ok(())
}

async fn connect(infra: &InfraClients) -> Result<MultiplexedConnection, AppError> {
    infra
        .redis
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| AppError::internal("REDIS_CONNECT_FAILED", e.to_string()))
}

async fn persist_json<T: Serialize>(
    infra: &InfraClients,
    key: &str,
    value: &T,
) -> Result<(), AppError> {
    let mut conn = connect(infra).await?;
    let payload = serde_json::to_string(value)
        .map_err(|e| AppError::internal("SERIALIZATION_ERROR", e.to_string()))?;
    let _: () = conn
        .set(key, payload)
        .await
        .map_err(|e| AppError::internal("REDIS_WRITE_FAILED", e.to_string()))?;
    Ok(())
}

async fn persist_json_nx<T: Serialize>(
    infra: &InfraClients,
    key: &str,
    value: &T,
) -> Result<bool, AppError> {
    let mut conn = connect(infra).await?;
    let payload = serde_json::to_string(value)
        .map_err(|e| AppError::internal("SERIALIZATION_ERROR", e.to_string()))?;
    let stored: Option<String> = redis::cmd("SET")
        .arg(key)
        .arg(payload)
        .arg("NX")
        .query_async(&mut conn)
        .await
        .map_err(|e| AppError::internal("REDIS_WRITE_FAILED", e.to_string()))?;
    Ok(stored.is_some())
}

/// Optimistic read-modify-write of one JSON document.
///
/// `f` receives the stored value and returns the value to keep plus whether
/// to write it. The write is an `EXEC` guarded by `WATCH`, retried when the
/// key changed after it was read. `connect` opens a fresh connection per call,
/// so the `WATCH` is not shared with other tasks.
async fn update_json<T, F>(infra: &InfraClients, key: &str, mut f: F) -> Result<T, AppError>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(Option<T>) -> Result<(T, bool), AppError>,
{
    let mut conn = connect(infra).await?;
    for attempt in 1..=UPDATE_MAX_ATTEMPTS {
        let _: () = redis::cmd("WATCH")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal("REDIS_WRITE_FAILED", e.to_string()))?;
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| AppError::internal("REDIS_QUERY_FAILED", e.to_string()))?;
        let current = raw
            .map(|s| serde_json::from_str::<T>(&s))
            .transpose()
            .map_err(|e| AppError::internal("REDIS_DECODE_FAILED", e.to_string()))?;

        let (next, write) = f(current)?;
        if !write {
            let _: () = redis::cmd("UNWATCH")
                .query_async(&mut conn)
                .await
                .map_err(|e| AppError::internal("REDIS_WRITE_FAILED", e.to_string()))?;
            return Ok(next);
        }
        let payload = serde_json::to_string(&next)
            .map_err(|e| AppError::internal("SERIALIZATION_ERROR", e.to_string()))?;
        let committed: Option<()> = redis::pipe()
            .atomic()
            .set(key, payload)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal("REDIS_WRITE_FAILED", e.to_string()))?;
        if committed.is_some() {
            return Ok(next);
        }
        debug!(key = %key, attempt, "concurrent update; retrying");
    }
    Err(AppError::conflict(
        "STORE_WRITE_CONFLICT",
        format!("{key} kept changing during update"),
    ))
}

async fn load_json<T: DeserializeOwned>(
    infra: &InfraClients,
    key: &str,
) -> Result<Option<T>, AppError> {
    let mut conn = connect(infra).await?;
    let raw: Option<String> = conn
        .get(key)
        .await
        .map_err(|e| AppError::internal("REDIS_QUERY_FAILED", e.to_string()))?;
    raw.map(|s| serde_json::from_str::<T>(&s))
        .transpose()
        .map_err(|e| AppError::internal("REDIS_DECODE_FAILED", e.to_string()))
}

fn job_key(job_id: &str) -> String {
    format!("{ASYNC_JOBS_COLLECTION}:{job_id}")
}

fn shipment_jobs_key(shipment_id: &str) -> String {
    format!("{ASYNC_JOBS_COLLECTION}:shipment:{shipment_id}")
}

fn action_key(transaction_hash: &str) -> String {
    format!("{ONCHAIN_ACTIONS_COLLECTION}:{transaction_hash}")
}

fn job_actions_key(job_id: &str) -> String {
    format!("{ONCHAIN_ACTIONS_COLLECTION}:job:{job_id}")
}

fn receipt_key(transaction_hash: &str) -> String {
    format!("{TRANSACTION_RECEIPTS_COLLECTION}:{transaction_hash}")
}

fn messages_key(job_id: &str) -> String {
    format!("{JOB_MESSAGES_COLLECTION}:{job_id}")
}

fn eth_message_key(job_id: &str, transaction_hash: &str) -> String {
    format!("{JOB_MESSAGES_COLLECTION}:eth:{job_id}:{transaction_hash}")
}

fn shipment_key(shipment_id: &str) -> String {
    format!("{SHIPMENTS_COLLECTION}:{shipment_id}")
}

#[cfg(test)]
mod tests {
    use super::is_valid_transition;
    use crate::module::async_job::schema::JobState;

    #[test]
    fn refire_after_failure_is_allowed() {
        assert!(is_valid_transition(JobState::Failed, JobState::Running));
        assert!(is_valid_transition(JobState::Failed, JobState::Complete));
    }

    #[test]
    fn nothing_returns_to_pending() {
        for from in [
            JobState::Running,
            JobState::Complete,
            JobState::Failed,
        ] {
            assert!(!is_valid_transition(from, JobState::Pending));
        }
    }

    #[test]
    fn complete_is_terminal() {
        for to in [JobState::Running, JobState::Failed, JobState::Pending] {
            assert!(!is_valid_transition(JobState::Complete, to));
        }
    }
}
