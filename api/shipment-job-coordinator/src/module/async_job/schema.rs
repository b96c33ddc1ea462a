use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Complete,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }

    /// Jobs in these states must not be fired again.
    pub fn is_in_flight_or_done(&self) -> bool {
        matches!(self, Self::Running | Self::Complete)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Error,
    EthTransaction,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::EthTransaction => "ETH_TRANSACTION",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStateTransition {
    pub from_state: Option<JobState>,
    pub to_state: JobState,
    pub transitioned_at: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRpcJobRequest {
    #[serde(alias = "shipmentId")]
    pub shipment_id: String,
    #[serde(alias = "rpcMethod")]
    pub rpc_method: String,
    #[serde(default, alias = "rpcParameters")]
    pub rpc_parameters: Vec<Value>,
    #[serde(alias = "signingWalletId")]
    pub signing_wallet_id: String,
    #[serde(default, alias = "delayMinutes")]
    pub delay_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRpcJobResponse {
    pub accepted: bool,
    pub job_id: String,
    pub state: Option<JobState>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessageRequest {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessageResponse {
    pub accepted: bool,
    pub duplicate: bool,
    pub job_id: String,
    pub state: Option<JobState>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceiptView {
    pub transaction_hash: String,
    pub block_hash: Option<String>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub status: Option<bool>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnChainActionView {
    pub transaction_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub receipt: Option<TransactionReceiptView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncJobView {
    pub job_id: String,
    pub shipment_id: String,
    pub state: JobState,
    pub rpc_method: String,
    pub signing_wallet_id: String,
    pub delay_minutes: i64,
    pub last_try: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub actions: Vec<OnChainActionView>,
    pub transitions: Vec<JobStateTransition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAsyncJobResponse {
    pub found: bool,
    pub job: Option<AsyncJobView>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetShipmentJobsResponse {
    pub found: bool,
    pub shipment_id: String,
    pub jobs: Vec<AsyncJobView>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAsyncJobResponse {
    pub accepted: bool,
    pub job_id: String,
    pub state: Option<JobState>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultHashUpdateRequest {
    #[serde(alias = "signingWalletId")]
    pub signing_wallet_id: String,
    #[serde(alias = "vaultHash")]
    pub vault_hash: String,
    #[serde(default, alias = "rateLimit")]
    pub rate_limit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultHashUpdateResponse {
    pub accepted: bool,
    pub shipment_id: String,
    pub decision: Option<String>,
    pub job_ids: Vec<String>,
    pub refired_job_ids: Vec<String>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatsResponse {
    pub available: bool,
    pub backend: String,
    pub queued: u64,
    pub processing: u64,
    pub retry_scheduled: u64,
    pub dead_letter: u64,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMethodMetricsView {
    pub method: String,
    pub calls: u64,
    pub errors: u64,
    pub avg_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetricsView {
    pub jobs_queued: u64,
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub retries_scheduled: u64,
    pub wallet_in_use: u64,
    pub transaction_collisions: u64,
    pub duplicate_messages: u64,
    pub last_error_ts: i64,
    pub rpc_methods: Vec<RpcMethodMetricsView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub redis_available: bool,
    pub worker_enabled: bool,
    pub queue: QueueStatsResponse,
    pub metrics: HealthMetricsView,
    pub error_code: Option<String>,
    pub reason: String,
}
