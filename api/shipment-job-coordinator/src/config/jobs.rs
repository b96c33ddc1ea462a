//! Timing knobs handed to the job pipeline at construction time.

use crate::config::environment::AppConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TaskRunnerConfig {
    pub wallet_lock_timeout: Duration,
    pub callback_base_url: String,
}

impl TaskRunnerConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            wallet_lock_timeout: seconds(app.wallet_lock_timeout_seconds),
            callback_base_url: app.internal_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn callback_url(&self, job_id: &str) -> String {
        format!("{}/v1/jobs/{job_id}/message", self.callback_base_url)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub task_lock_ttl: Duration,
    pub wallet_in_use_retry_seconds: i64,
    pub tx_collision_retry_seconds: i64,
    pub backoff_base_seconds: i64,
    pub backoff_max_seconds: i64,
    pub max_retries: i64,
}

impl DispatchConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            task_lock_ttl: seconds(app.task_lock_ttl_seconds),
            wallet_in_use_retry_seconds: app.wallet_in_use_retry_seconds.max(1),
            tx_collision_retry_seconds: app.tx_collision_retry_seconds.max(1),
            backoff_base_seconds: app.worker_backoff_base_seconds.max(1),
            backoff_max_seconds: app.worker_backoff_max_seconds.max(1),
            max_retries: app.worker_max_retries.max(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VaultHashConfig {
    pub rate_limit_minutes: i64,
}

impl VaultHashConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            rate_limit_minutes: app.vault_hash_rate_limit_minutes.max(0),
        }
    }
}

fn seconds(value: i64) -> Duration {
    Duration::from_secs(value.max(1) as u64)
}
