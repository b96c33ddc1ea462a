use crate::service::lock_service::{LockError, LockService, ReleaseOutcome, wallet_lock_key};
use std::time::Duration;
use tracing::{debug, warn};

/// Per-wallet nonce guard: at most one live lease per signing wallet.
#[derive(Debug, Clone)]
pub struct WalletLockManager {
    locks: LockService,
    timeout: Duration,
}

impl WalletLockManager {
    pub fn new(locks: LockService, timeout: Duration) -> Self {
        Self { locks, timeout }
    }

    pub async fn acquire(&self, wallet_id: &str) -> Result<Option<String>, LockError> {
        let token = self
            .locks
            .try_acquire(&wallet_lock_key(wallet_id), self.timeout)
            .await?;
        debug!(wallet_id = %wallet_id, acquired = token.is_some(), "wallet lock attempt");
        Ok(token)
    }

    /// Never fails. An expired lease or a backend error is logged and reported as `NotHeld`.
    pub async fn release(&self, wallet_id: &str, token: &str) -> ReleaseOutcome {
        match self.locks.release(&wallet_lock_key(wallet_id), token).await {
            Ok(ReleaseOutcome::Released) => {
                debug!(wallet_id = %wallet_id, "wallet lock released");
                ReleaseOutcome::Released
            }
            Ok(ReleaseOutcome::NotHeld) => {
                warn!(wallet_id = %wallet_id, "wallet lock already expired or released");
                ReleaseOutcome::NotHeld
            }
            Err(e) => {
                warn!(wallet_id = %wallet_id, error = %e, "wallet lock release failed");
                ReleaseOutcome::NotHeld
            }
        }
    }

    pub async fn is_locked(&self, wallet_id: &str) -> Result<bool, LockError> {
        self.locks.is_held(&wallet_lock_key(wallet_id)).await
    }
}
