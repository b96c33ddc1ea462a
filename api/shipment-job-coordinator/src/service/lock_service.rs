//! Named, token-owned leases with a TTL.
//!
//! Acquisition never waits. Release is compare-and-delete, so a holder whose
//! lease expired cannot free a lease somebody else took afterwards.

use crate::infra::InfraClients;
use once_cell::sync::Lazy;
use redis::Script;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

const WALLET_LOCK_PREFIX: &str = "wallet-lock:";
const TASK_LOCK_PREFIX: &str = "asyncjobs:dispatch-lock:";

static COMPARE_AND_DELETE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#,
    )
});

#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("lock backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotHeld,
}

#[derive(Debug, Clone)]
struct LocalLease {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
enum LockBackend {
    Redis(redis::Client),
    Local(Arc<Mutex<HashMap<String, LocalLease>>>),
}

#[derive(Debug, Clone)]
pub struct LockService {
    backend: LockBackend,
}

impl LockService {
    pub fn redis(client: redis::Client) -> Self {
        Self {
            backend: LockBackend::Redis(client),
        }
    }

    /// Leases that only exclude holders inside this process.
    pub fn local() -> Self {
        Self {
            backend: LockBackend::Local(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    pub fn from_infra(infra: Option<&InfraClients>) -> Self {
        match infra {
            Some(i) => Self::redis(i.redis.clone()),
            None => Self::local(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            LockBackend::Redis(_) => "redis",
            LockBackend::Local(_) => "local",
        }
    }

    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>, LockError> {
        let token = Uuid::new_v4().to_string();
        match &self.backend {
            LockBackend::Redis(client) => {
                let mut conn = client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| LockError::Backend(format!("redis connect failed: {e}")))?;
                let acquired: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(&token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis().max(1) as u64)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| LockError::Backend(format!("lock acquisition failed: {e}")))?;
                Ok(acquired.map(|_| token))
            }
            LockBackend::Local(leases) => {
                let mut leases = leases
                    .lock()
                    .map_err(|_| LockError::Backend("local lock table poisoned".to_string()))?;
                let now = Instant::now();
                if leases.get(key).is_some_and(|l| l.expires_at > now) {
                    return Ok(None);
                }
                leases.insert(
                    key.to_string(),
                    LocalLease {
                        token: token.clone(),
                        expires_at: now + ttl,
                    },
                );
                Ok(Some(token))
            }
        }
    }

    pub async fn release(&self, key: &str, token: &str) -> Result<ReleaseOutcome, LockError> {
        match &self.backend {
            LockBackend::Redis(client) => {
                let mut conn = client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| LockError::Backend(format!("redis connect failed: {e}")))?;
                let deleted: i64 = COMPARE_AND_DELETE
                    .key(key)
                    .arg(token)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| LockError::Backend(format!("lock release failed: {e}")))?;
                Ok(if deleted > 0 {
                    ReleaseOutcome::Released
                } else {
                    ReleaseOutcome::NotHeld
                })
            }
            LockBackend::Local(leases) => {
                let mut leases = leases
                    .lock()
                    .map_err(|_| LockError::Backend("local lock table poisoned".to_string()))?;
                let live = leases
                    .get(key)
                    .is_some_and(|l| l.token == token && l.expires_at > Instant::now());
                if live {
                    leases.remove(key);
                    Ok(ReleaseOutcome::Released)
                } else {
                    Ok(ReleaseOutcome::NotHeld)
                }
            }
        }
    }

    pub async fn is_held(&self, key: &str) -> Result<bool, LockError> {
        match &self.backend {
            LockBackend::Redis(client) => {
                let mut conn = client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| LockError::Backend(format!("redis connect failed: {e}")))?;
                redis::cmd("EXISTS")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| LockError::Backend(format!("lock lookup failed: {e}")))
            }
            LockBackend::Local(leases) => {
                let leases = leases
                    .lock()
                    .map_err(|_| LockError::Backend("local lock table poisoned".to_string()))?;
                Ok(leases
                    .get(key)
                    .is_some_and(|l| l.expires_at > Instant::now()))
            }
        }
    }
}

pub fn wallet_lock_key(wallet_id: &str) -> String {
    format!("{WALLET_LOCK_PREFIX}{wallet_id}")
}

pub fn task_lock_key(job_id: &str) -> String {
    format!("{TASK_LOCK_PREFIX}{job_id}")
}
