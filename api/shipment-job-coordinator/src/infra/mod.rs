use crate::config::db::RedisConfig;
use redis::Client as RedisClient;

#[derive(Debug, Clone)]
pub struct InfraClients {
    pub redis: RedisClient,
}

pub const ASYNC_JOBS_COLLECTION: &str = "async_jobs";
pub const ASYNC_JOB_TRANSITIONS_COLLECTION: &str = "async_job_transitions";
pub const ONCHAIN_ACTIONS_COLLECTION: &str = "onchain_actions";
pub const TRANSACTION_RECEIPTS_COLLECTION: &str = "transaction_receipts";
pub const JOB_MESSAGES_COLLECTION: &str = "job_messages";
pub const SHIPMENTS_COLLECTION: &str = "shipments";

pub async fn init_infra(config: &RedisConfig) -> Result<Option<InfraClients>, String> {
    let Some(redis_url) = &config.url else {
        return Ok(None);
    };

    let redis =
        RedisClient::open(redis_url.clone()).map_err(|e| format!("redis init failed: {e}"))?;
    let mut conn = redis
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| format!("redis connect failed: {e}"))?;
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| format!("redis ping failed: {e}"))?;
    Ok(Some(InfraClients { redis }))
}
