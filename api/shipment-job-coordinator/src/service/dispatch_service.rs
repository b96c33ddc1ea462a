//! Retry policy around a single job attempt.
//!
//! Each fire holds the job's dispatch lock for the whole attempt, so a job id
//! delivered twice runs once. Errors are turned into a [`FireOutcome`] that
//! tells the scheduler whether and when to try again.

use crate::app::AppState;
use crate::config::jobs::{DispatchConfig, TaskRunnerConfig};
use crate::module::async_job::crud;
use crate::module::async_job::error::JobError;
use crate::module::async_job::schema::JobState;
use crate::service::lock_service::{ReleaseOutcome, task_lock_key};
use crate::service::metrics_service;
use crate::service::task_runner_service::{AsyncTask, RunOutcome};
use chrono::Utc;
use rand::Rng;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    Submitted { transaction_hash: String },
    Skipped { state: JobState },
    AlreadyDispatched,
    RetryScheduled { delay_seconds: i64, reason: String },
    Failed { reason: String },
    Dropped { reason: String },
}

#[derive(Clone)]
pub struct JobDispatcher {
    state: AppState,
    config: DispatchConfig,
    runner: TaskRunnerConfig,
}

impl JobDispatcher {
    pub fn new(state: AppState, config: DispatchConfig, runner: TaskRunnerConfig) -> Self {
        Self {
            state,
            config,
            runner,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.clone(),
            DispatchConfig::from_app(&state.config),
            TaskRunnerConfig::from_app(&state.config),
        )
    }

    /// `retries` counts earlier attempts of this job.
    pub async fn fire(&self, job_id: &str, retries: i64) -> FireOutcome {
        let lock_key = task_lock_key(job_id);
        let token = match self
            .state
            .locks
            .try_acquire(&lock_key, self.config.task_lock_ttl)
            .await
        {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!(job_id = %job_id, "job already being dispatched; dropping duplicate delivery");
                return FireOutcome::AlreadyDispatched;
            }
            Err(e) => return self.recover(job_id, retries, JobError::Lock(e)).await,
        };

        let outcome = match self.attempt(job_id).await {
            Ok(RunOutcome::Submitted { transaction_hash }) => {
                FireOutcome::Submitted { transaction_hash }
            }
            Ok(RunOutcome::Skipped { state }) => FireOutcome::Skipped { state },
            Err(err) => self.recover(job_id, retries, err).await,
        };

        match self.state.locks.release(&lock_key, &token).await {
            Ok(ReleaseOutcome::Released) => {}
            Ok(ReleaseOutcome::NotHeld) => {
                warn!(job_id = %job_id, "dispatch lock expired before the attempt finished");
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "dispatch lock release failed"),
        }
        outcome
    }

    async fn attempt(&self, job_id: &str) -> Result<RunOutcome, JobError> {
        let task = AsyncTask::load(self.state.clone(), job_id, self.runner.clone()).await?;
        task.run().await
    }

    async fn recover(&self, job_id: &str, retries: i64, err: JobError) -> FireOutcome {
        let cfg = &self.config;
        match &err {
            JobError::WalletInUse(_) => {
                let delay = jittered_delay(cfg.wallet_in_use_retry_seconds);
                self.bounded_retry(job_id, retries, delay, err).await
            }
            JobError::TransactionCollision(_) => {
                let delay = jittered_delay(cfg.tx_collision_retry_seconds);
                self.bounded_retry(job_id, retries, delay, err).await
            }
            JobError::Rpc(rpc_err) => {
                let delay_seconds =
                    backoff_delay(cfg.backoff_base_seconds, cfg.backoff_max_seconds, retries);
                warn!(job_id = %job_id, retries, delay_seconds, error = %rpc_err, "engine call failed; backing off");
                metrics_service::inc_retries_scheduled();
                FireOutcome::RetryScheduled {
                    delay_seconds,
                    reason: err.to_string(),
                }
            }
            JobError::NotFound(_) => {
                error!(job_id = %job_id, error = %err, "job vanished; dropping");
                metrics_service::set_last_error_ts(Utc::now().timestamp());
                FireOutcome::Dropped {
                    reason: err.to_string(),
                }
            }
            _ => {
                let delay = backoff_delay(cfg.backoff_base_seconds, cfg.backoff_max_seconds, retries);
                self.bounded_retry(job_id, retries, delay, err).await
            }
        }
    }

    async fn bounded_retry(
        &self,
        job_id: &str,
        retries: i64,
        delay_seconds: i64,
        err: JobError,
    ) -> FireOutcome {
        let reason = err.to_string();
        if retries >= self.config.max_retries {
            error!(job_id = %job_id, retries, reason = %reason, "retries exhausted; marking job FAILED");
            metrics_service::set_last_error_ts(Utc::now().timestamp());
            match crud::transition_job_state(
                &self.state,
                job_id,
                JobState::Failed,
                Some(reason.clone()),
            )
            .await
            {
                Ok(t) if t.applied => metrics_service::inc_jobs_failed(),
                Ok(_) => {}
                Err(e) => {
                    error!(job_id = %job_id, error_code = e.code, reason = %e.message, "failed to record FAILED state")
                }
            }
            return FireOutcome::Failed { reason };
        }

        warn!(job_id = %job_id, retries, delay_seconds, reason = %reason, "job attempt deferred");
        metrics_service::inc_retries_scheduled();
        FireOutcome::RetryScheduled {
            delay_seconds,
            reason,
        }
    }
}

/// Uniform in `[0.5 × base, 1.5 × base]`, never below one second.
pub fn jittered_delay(base_seconds: i64) -> i64 {
    let base = base_seconds.max(1) as f64;
    let factor: f64 = rand::thread_rng().gen_range(0.5..=1.5);
    ((base * factor).round() as i64).max(1)
}

pub fn backoff_delay(base_seconds: i64, max_seconds: i64, retries: i64) -> i64 {
    let base = base_seconds.max(1);
    let exponent = retries.clamp(0, 32) as u32;
    base.saturating_mul(1_i64 << exponent).min(max_seconds.max(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_half_either_side() {
        for _ in 0..500 {
            let d = jittered_delay(30);
            assert!((15..=45).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn backoff_doubles_until_capped() {
        assert_eq!(backoff_delay(3, 60, 0), 3);
        assert_eq!(backoff_delay(3, 60, 1), 6);
        assert_eq!(backoff_delay(3, 60, 4), 48);
        assert_eq!(backoff_delay(3, 60, 5), 60);
        assert_eq!(backoff_delay(3, 60, 500), 60);
    }
}
