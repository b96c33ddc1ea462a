use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rust_env: String,
    pub api_host: String,
    pub api_port: u16,
    pub redis_url: Option<String>,
    pub worker_enabled: bool,
    pub worker_poll_seconds: i64,
    pub worker_max_retries: i64,
    pub worker_backoff_base_seconds: i64,
    pub worker_backoff_max_seconds: i64,
    pub engine_rpc_url: String,
    pub engine_rpc_timeout_seconds: u64,
    pub internal_url: String,
    pub wallet_lock_timeout_seconds: i64,
    pub task_lock_ttl_seconds: i64,
    pub wallet_in_use_retry_seconds: i64,
    pub tx_collision_retry_seconds: i64,
    pub vault_hash_rate_limit_minutes: i64,
    pub engine_auth_enabled: bool,
    pub engine_auth_secret: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        load_dotenv_layers();
        let config = Self {
            rust_env: read_var("RUST_ENV")?,
            api_host: read_var("API_HOST")?,
            api_port: read_var("API_PORT")?
                .parse::<u16>()
                .map_err(|e| format!("invalid API_PORT: {e}"))?,
            redis_url: env::var("REDIS_URL").ok(),
            worker_enabled: read_optional_bool("WORKER_ENABLED", true),
            worker_poll_seconds: read_optional_i64("WORKER_POLL_SECONDS", 2)?,
            worker_max_retries: read_optional_i64("WORKER_MAX_RETRIES", 10)?,
            worker_backoff_base_seconds: read_optional_i64("WORKER_BACKOFF_BASE_SECONDS", 3)?,
            worker_backoff_max_seconds: read_optional_i64("WORKER_BACKOFF_MAX_SECONDS", 60)?,
            engine_rpc_url: read_optional_string("ENGINE_RPC_URL", "http://127.0.0.1:2000"),
            engine_rpc_timeout_seconds: read_optional_u64("ENGINE_RPC_TIMEOUT_SECONDS", 30)?,
            internal_url: read_optional_string("INTERNAL_URL", "http://127.0.0.1:8000"),
            wallet_lock_timeout_seconds: read_optional_i64("WALLET_LOCK_TIMEOUT_SECONDS", 300)?,
            task_lock_ttl_seconds: read_optional_i64("TASK_LOCK_TTL_SECONDS", 600)?,
            wallet_in_use_retry_seconds: read_optional_i64("WALLET_IN_USE_RETRY_SECONDS", 30)?,
            tx_collision_retry_seconds: read_optional_i64("TX_COLLISION_RETRY_SECONDS", 60)?,
            vault_hash_rate_limit_minutes: read_optional_i64("VAULT_HASH_RATE_LIMIT_MINUTES", 5)?,
            engine_auth_enabled: read_optional_bool("ENGINE_AUTH_ENABLED", false),
            engine_auth_secret: env::var("ENGINE_AUTH_SECRET").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects timing combinations that let one job be dispatched twice.
    ///
    /// A stuck rate-limited job is re-fired once `1.2 × delay` has elapsed, so
    /// a dispatch lock that can expire before that deadline would let the
    /// re-fire run alongside a still-live first attempt.
    pub fn validate(&self) -> Result<(), String> {
        if self.wallet_lock_timeout_seconds <= 0 {
            return Err("WALLET_LOCK_TIMEOUT_SECONDS must be positive".to_string());
        }
        if self.task_lock_ttl_seconds <= 0 {
            return Err("TASK_LOCK_TTL_SECONDS must be positive".to_string());
        }
        if self.vault_hash_rate_limit_minutes < 0 {
            return Err("VAULT_HASH_RATE_LIMIT_MINUTES cannot be negative".to_string());
        }
        let stuck_deadline_seconds = self.vault_hash_rate_limit_minutes * 72;
        if self.task_lock_ttl_seconds < stuck_deadline_seconds {
            return Err(format!(
                "TASK_LOCK_TTL_SECONDS ({}) must be at least the stuck-job deadline ({stuck_deadline_seconds}s)",
                self.task_lock_ttl_seconds
            ));
        }
        if self.worker_backoff_max_seconds < self.worker_backoff_base_seconds {
            return Err(
                "WORKER_BACKOFF_MAX_SECONDS must not be below WORKER_BACKOFF_BASE_SECONDS"
                    .to_string(),
            );
        }
        if self.engine_auth_enabled && self.engine_auth_secret.is_none() {
            return Err("ENGINE_AUTH_SECRET is required when ENGINE_AUTH_ENABLED".to_string());
        }
        Ok(())
    }
}

fn read_var(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("missing required env var: {key}"))
}

fn read_optional_i64(key: &str, default: i64) -> Result<i64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<i64>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn read_optional_u64(key: &str, default: u64) -> Result<u64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn read_optional_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn read_optional_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_dotenv_layers() {
    for path in [".env", "../.env", "../../.env"] {
        let _ = dotenvy::from_path_override(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            rust_env: "test".to_string(),
            api_host: "127.0.0.1".to_string(),
            api_port: 0,
            redis_url: None,
            worker_enabled: false,
            worker_poll_seconds: 1,
            worker_max_retries: 3,
            worker_backoff_base_seconds: 3,
            worker_backoff_max_seconds: 60,
            engine_rpc_url: "http://127.0.0.1:2000".to_string(),
            engine_rpc_timeout_seconds: 5,
            internal_url: "http://127.0.0.1:8000".to_string(),
            wallet_lock_timeout_seconds: 300,
            task_lock_ttl_seconds: 600,
            wallet_in_use_retry_seconds: 30,
            tx_collision_retry_seconds: 60,
            vault_hash_rate_limit_minutes: 5,
            engine_auth_enabled: false,
            engine_auth_secret: None,
        }
    }

    #[test]
    fn default_timings_are_consistent() {
        config().validate().expect("defaults must validate");
    }

    #[test]
    fn dispatch_lock_shorter_than_stuck_deadline_is_rejected() {
        let mut cfg = config();
        cfg.vault_hash_rate_limit_minutes = 10;
        cfg.task_lock_ttl_seconds = 600;
        let err = cfg.validate().expect_err("720s deadline exceeds 600s ttl");
        assert!(err.contains("stuck-job deadline"));
    }

    #[test]
    fn engine_auth_requires_secret() {
        let mut cfg = config();
        cfg.engine_auth_enabled = true;
        assert!(cfg.validate().is_err());
        cfg.engine_auth_secret = Some("s3cret".to_string());
        assert!(cfg.validate().is_ok());
    }
}
