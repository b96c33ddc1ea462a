use crate::app::AppState;
use crate::service::dispatch_service::{FireOutcome, JobDispatcher};
use crate::service::metrics_service;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::collections::{HashMap, VecDeque};
use std::sync::MutexGuard;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

const QUEUE_KEY: &str = "asyncjobs:queue";
const PROCESSING_KEY: &str = "asyncjobs:processing";
const RETRY_ZSET_KEY: &str = "asyncjobs:retry";
const DLQ_KEY: &str = "asyncjobs:dead";
const ATTEMPTS_HASH_KEY: &str = "asyncjobs:attempts";

/// Queue used when Redis is not configured. Same semantics, one process.
#[derive(Debug, Default)]
pub struct LocalQueue {
    ready: VecDeque<String>,
    scheduled: Vec<(i64, String)>,
    processing: Vec<String>,
    attempts: HashMap<String, i64>,
    dead: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalQueueSnapshot {
    pub ready: Vec<String>,
    pub scheduled: Vec<(i64, String)>,
    pub dead: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepth {
    pub queued: u64,
    pub processing: u64,
    pub retry_scheduled: u64,
    pub dead_letter: u64,
}

/// Makes `job_id` runnable after `delay_seconds`.
pub async fn enqueue_job(state: &AppState, job_id: &str, delay_seconds: i64) -> Result<(), String> {
    let due_at = now_unix() + delay_seconds.max(0);
    if let Some(mut conn) = connect(state).await? {
        if delay_seconds > 0 {
            let _: usize = redis::cmd("ZADD")
                .arg(RETRY_ZSET_KEY)
                .arg(due_at)
                .arg(job_id)
                .query_async(&mut conn)
                .await
                .map_err(|e| format!("queue schedule failed: {e}"))?;
        } else {
            let _: usize = conn
                .lpush(QUEUE_KEY, job_id)
                .await
                .map_err(|e| format!("queue push failed: {e}"))?;
        }
    } else {
        let mut queue = local(state)?;
        if delay_seconds > 0 {
            queue.scheduled.push((due_at, job_id.to_string()));
        } else {
            queue.ready.push_back(job_id.to_string());
        }
    }
    metrics_service::inc_jobs_queued();
    info!(job_id = %job_id, delay_seconds, "async job enqueued");
    Ok(())
}

pub async fn run_worker(state: AppState) -> Result<(), String> {
    info!(backend = state.locks.backend_name(), "async job worker started");
    let dispatcher = JobDispatcher::from_state(&state);
    let idle = Duration::from_secs(state.config.worker_poll_seconds.max(1) as u64);
    loop {
        match step(&state, &dispatcher).await {
            Ok(Some(_)) => {}
            Ok(None) => sleep(idle).await,
            Err(e) => {
                warn!(error = %e, "worker step failed");
                sleep(idle).await;
            }
        }
    }
}

/// Runs at most one queued job. `None` when nothing was due.
pub async fn process_next(state: &AppState) -> Result<Option<(String, FireOutcome)>, String> {
    let dispatcher = JobDispatcher::from_state(state);
    step(state, &dispatcher).await
}

pub async fn queue_stats(state: &AppState) -> Result<QueueDepth, String> {
    let Some(mut conn) = connect(state).await? else {
        let queue = local(state)?;
        return Ok(QueueDepth {
            queued: queue.ready.len() as u64,
            processing: queue.processing.len() as u64,
            retry_scheduled: queue.scheduled.len() as u64,
            dead_letter: queue.dead.len() as u64,
        });
    };

    let queued: u64 = conn
        .llen(QUEUE_KEY)
        .await
        .map_err(|e| format!("queue len failed: {e}"))?;
    let processing: u64 = conn
        .llen(PROCESSING_KEY)
        .await
        .map_err(|e| format!("processing len failed: {e}"))?;
    let retry_scheduled: u64 = conn
        .zcard(RETRY_ZSET_KEY)
        .await
        .map_err(|e| format!("retry zcard failed: {e}"))?;
    let dead_letter: u64 = conn
        .llen(DLQ_KEY)
        .await
        .map_err(|e| format!("dead-letter len failed: {e}"))?;
    Ok(QueueDepth {
        queued,
        processing,
        retry_scheduled,
        dead_letter,
    })
}

pub fn local_queue_snapshot(state: &AppState) -> Result<LocalQueueSnapshot, String> {
    let queue = local(state)?;
    Ok(LocalQueueSnapshot {
        ready: queue.ready.iter().cloned().collect(),
        scheduled: queue.scheduled.clone(),
        dead: queue.dead.clone(),
    })
}

async fn step(
    state: &AppState,
    dispatcher: &JobDispatcher,
) -> Result<Option<(String, FireOutcome)>, String> {
    promote_due_retries(state).await?;
    let Some(job_id) = pull_next_job(state).await? else {
        return Ok(None);
    };
    let retries = attempts(state, &job_id).await?;
    let outcome = dispatcher.fire(&job_id, retries).await;
    settle(state, &job_id, &outcome).await?;
    Ok(Some((job_id, outcome)))
}

async fn pull_next_job(state: &AppState) -> Result<Option<String>, String> {
    let Some(mut conn) = connect(state).await? else {
        let mut queue = local(state)?;
        let next = queue.ready.pop_front();
        if let Some(job_id) = &next {
            queue.processing.push(job_id.clone());
        }
        return Ok(next);
    };

    redis::cmd("BRPOPLPUSH")
        .arg(QUEUE_KEY)
        .arg(PROCESSING_KEY)
        .arg(1)
        .query_async(&mut conn)
        .await
        .map_err(|e| format!("queue pull failed: {e}"))
}

async fn attempts(state: &AppState, job_id: &str) -> Result<i64, String> {
    let Some(mut conn) = connect(state).await? else {
        return Ok(local(state)?.attempts.get(job_id).copied().unwrap_or(0));
    };
    let current: Option<i64> = conn
        .hget(ATTEMPTS_HASH_KEY, job_id)
        .await
        .map_err(|e| format!("attempt lookup failed: {e}"))?;
    Ok(current.unwrap_or(0))
}

/// Applies the dispatcher's verdict to the queue.
async fn settle(state: &AppState, job_id: &str, outcome: &FireOutcome) -> Result<(), String> {
    let now = now_unix();
    let Some(mut conn) = connect(state).await? else {
        let mut queue = local(state)?;
        if let Some(pos) = queue.processing.iter().position(|j| j == job_id) {
            queue.processing.remove(pos);
        }
        match outcome {
            FireOutcome::Submitted { .. } | FireOutcome::Skipped { .. } => {
                queue.attempts.remove(job_id);
            }
            FireOutcome::AlreadyDispatched => {}
            FireOutcome::RetryScheduled { delay_seconds, .. } => {
                *queue.attempts.entry(job_id.to_string()).or_insert(0) += 1;
                queue
                    .scheduled
                    .push((now + delay_seconds, job_id.to_string()));
            }
            FireOutcome::Failed { .. } | FireOutcome::Dropped { .. } => {
                queue.attempts.remove(job_id);
                queue.dead.push(job_id.to_string());
            }
        }
        return Ok(());
    };

    match outcome {
        FireOutcome::Submitted { .. } | FireOutcome::Skipped { .. } => {
            let _: usize = conn
                .hdel(ATTEMPTS_HASH_KEY, job_id)
                .await
                .map_err(|e| format!("attempt reset failed: {e}"))?;
        }
        FireOutcome::AlreadyDispatched => {}
        FireOutcome::RetryScheduled { delay_seconds, .. } => {
            let _: i64 = conn
                .hincr(ATTEMPTS_HASH_KEY, job_id, 1)
                .await
                .map_err(|e| format!("attempt increment failed: {e}"))?;
            let _: usize = redis::cmd("ZADD")
                .arg(RETRY_ZSET_KEY)
                .arg(now + delay_seconds)
                .arg(job_id)
                .query_async(&mut conn)
                .await
                .map_err(|e| format!("retry schedule failed: {e}"))?;
        }
        FireOutcome::Failed { reason } | FireOutcome::Dropped { reason } => {
            error!(job_id = %job_id, reason = %reason, "job moved to dead letter");
            let _: usize = conn
                .hdel(ATTEMPTS_HASH_KEY, job_id)
                .await
                .map_err(|e| format!("attempt reset failed: {e}"))?;
            let _: usize = conn
                .lpush(DLQ_KEY, job_id)
                .await
                .map_err(|e| format!("dead-letter push failed: {e}"))?;
        }
    }
    release_processing_entry(&mut conn, job_id).await
}

async fn promote_due_retries(state: &AppState) -> Result<(), String> {
    let now = now_unix();
    let Some(mut conn) = connect(state).await? else {
        let mut queue = local(state)?;
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut queue.scheduled)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        queue.scheduled = later;
        let mut due = due;
        due.sort_by_key(|(at, _)| *at);
        queue.ready.extend(due.into_iter().map(|(_, job_id)| job_id));
        return Ok(());
    };

    let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
        .arg(RETRY_ZSET_KEY)
        .arg("-inf")
        .arg(now)
        .arg("LIMIT")
        .arg(0)
        .arg(50)
        .query_async(&mut conn)
        .await
        .map_err(|e| format!("retry scan failed: {e}"))?;
    for job_id in due {
        let removed: usize = redis::cmd("ZREM")
            .arg(RETRY_ZSET_KEY)
            .arg(&job_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| format!("retry zrem failed: {e}"))?;
        if removed == 0 {
            continue;
        }
        let _: usize = conn
            .lpush(QUEUE_KEY, &job_id)
            .await
            .map_err(|e| format!("retry requeue failed: {e}"))?;
    }
    Ok(())
}

async fn release_processing_entry(
    conn: &mut MultiplexedConnection,
    job_id: &str,
) -> Result<(), String> {
    let _: usize = conn
        .lrem(PROCESSING_KEY, 1, job_id)
        .await
        .map_err(|e| format!("processing cleanup failed: {e}"))?;
    Ok(())
}

async fn connect(state: &AppState) -> Result<Option<MultiplexedConnection>, String> {
    let Some(infra) = &state.infra else {
        return Ok(None);
    };
    infra
        .redis
        .get_multiplexed_async_connection()
        .await
        .map(Some)
        .map_err(|e| format!("redis connect failed: {e}"))
}

fn local(state: &AppState) -> Result<MutexGuard<'_, LocalQueue>, String> {
    state
        .local_queue
        .lock()
        .map_err(|_| "local queue lock poisoned".to_string())
}

fn now_unix() -> i64 {
    Utc::now().timestamp()
}
