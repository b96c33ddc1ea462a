use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static JOBS_QUEUED: AtomicU64 = AtomicU64::new(0);
static JOBS_SUBMITTED: AtomicU64 = AtomicU64::new(0);
static JOBS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static JOBS_FAILED: AtomicU64 = AtomicU64::new(0);
static RETRY_SCHEDULED: AtomicU64 = AtomicU64::new(0);
static WALLET_IN_USE: AtomicU64 = AtomicU64::new(0);
static TX_COLLISIONS: AtomicU64 = AtomicU64::new(0);
static DUPLICATE_MESSAGES: AtomicU64 = AtomicU64::new(0);

static LAST_ERROR_TS: AtomicI64 = AtomicI64::new(0);

static RPC_METHODS: Lazy<Mutex<BTreeMap<String, RpcMethodStats>>> =
    Lazy::new(|| Mutex::new(BTreeMap::new()));

#[derive(Debug, Clone, Default)]
pub struct RpcMethodStats {
    pub calls: u64,
    pub errors: u64,
    pub total_latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_queued: u64,
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub retries_scheduled: u64,
    pub wallet_in_use: u64,
    pub transaction_collisions: u64,
    pub duplicate_messages: u64,
    pub last_error_ts: i64,
    pub rpc_methods: Vec<(String, RpcMethodStats)>,
}

pub fn inc_jobs_queued() {
    JOBS_QUEUED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_jobs_submitted() {
    JOBS_SUBMITTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_jobs_completed() {
    JOBS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_jobs_failed() {
    JOBS_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_retries_scheduled() {
    RETRY_SCHEDULED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_wallet_in_use() {
    WALLET_IN_USE.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_transaction_collisions() {
    TX_COLLISIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_duplicate_messages() {
    DUPLICATE_MESSAGES.fetch_add(1, Ordering::Relaxed);
}

pub fn set_last_error_ts(ts: i64) {
    LAST_ERROR_TS.store(ts, Ordering::Relaxed);
}

/// Called once per Engine attempt, successful or not.
pub fn record_rpc_call(method: &str, latency_ms: u64, failed: bool) {
    let Ok(mut methods) = RPC_METHODS.lock() else {
        return;
    };
    let stats = methods.entry(method.to_string()).or_default();
    stats.calls += 1;
    stats.total_latency_ms += latency_ms;
    if failed {
        stats.errors += 1;
    }
}

pub fn snapshot() -> MetricsSnapshot {
    let rpc_methods = RPC_METHODS
        .lock()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    MetricsSnapshot {
        jobs_queued: JOBS_QUEUED.load(Ordering::Relaxed),
        jobs_submitted: JOBS_SUBMITTED.load(Ordering::Relaxed),
        jobs_completed: JOBS_COMPLETED.load(Ordering::Relaxed),
        jobs_failed: JOBS_FAILED.load(Ordering::Relaxed),
        retries_scheduled: RETRY_SCHEDULED.load(Ordering::Relaxed),
        wallet_in_use: WALLET_IN_USE.load(Ordering::Relaxed),
        transaction_collisions: TX_COLLISIONS.load(Ordering::Relaxed),
        duplicate_messages: DUPLICATE_MESSAGES.load(Ordering::Relaxed),
        last_error_ts: LAST_ERROR_TS.load(Ordering::Relaxed),
        rpc_methods,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_stats_accumulate_per_method() {
        record_rpc_call("metrics.test.sign", 10, false);
        record_rpc_call("metrics.test.sign", 30, true);
        let snap = snapshot();
        let (_, stats) = snap
            .rpc_methods
            .iter()
            .find(|(m, _)| m == "metrics.test.sign")
            .expect("method recorded");
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.total_latency_ms, 40);
    }
}
