use super::schema::{JobState, JobStateTransition, MessageType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Seconds of stuck-job grace per minute of scheduling delay (1.2 × 60).
pub const STUCK_SECONDS_PER_DELAY_MINUTE: i64 = 72;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobParameters {
    pub rpc_method: String,
    #[serde(default)]
    pub rpc_parameters: Vec<Value>,
    pub signing_wallet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_tx: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncJobRecord {
    pub job_id: String,
    pub shipment_id: String,
    pub state: JobState,
    pub parameters: JobParameters,
    pub last_try: Option<i64>,
    pub delay_minutes: i64,
    pub wallet_lock_token: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub transitions: Vec<JobStateTransition>,
}

impl AsyncJobRecord {
    /// Unix time after which a still-pending job is considered stuck.
    pub fn stuck_deadline(&self) -> i64 {
        let anchor = self.last_try.unwrap_or(self.created_at);
        anchor + self.delay_minutes.max(0) * STUCK_SECONDS_PER_DELAY_MINUTE
    }

    pub fn is_stuck(&self, now: i64) -> bool {
        self.state == JobState::Pending && now > self.stuck_deadline()
    }
}

#[derive(Debug, Clone)]
pub struct NewAsyncJob {
    pub shipment_id: String,
    pub parameters: JobParameters,
    pub delay_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnChainActionRecord {
    pub transaction_hash: String,
    pub job_id: String,
    pub shipment_id: String,
    pub unsigned_tx: Value,
    pub send_receipt: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionReceiptRecord {
    pub transaction_hash: String,
    pub block_hash: Option<String>,
    pub block_number: Option<u64>,
    pub contract_address: Option<String>,
    pub cumulative_gas_used: Option<u64>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub gas_used: Option<u64>,
    pub logs: Value,
    pub logs_bloom: Option<String>,
    pub status: Option<bool>,
    pub transaction_index: Option<u64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TransactionReceiptRecord {
    /// Builds a receipt from an Engine receipt payload.
    ///
    /// Numeric fields arrive either as JSON numbers or as `0x` quantities.
    pub fn from_engine(transaction_hash: &str, body: &Value, now: i64) -> Self {
        Self {
            transaction_hash: transaction_hash.to_string(),
            block_hash: value_str(body, &["blockHash", "block_hash"]),
            block_number: value_u64(body, &["blockNumber", "block_number"]),
            contract_address: value_str(body, &["contractAddress", "contract_address"]),
            cumulative_gas_used: value_u64(body, &["cumulativeGasUsed", "cumulative_gas_used"]),
            from: value_str(body, &["from"]),
            to: value_str(body, &["to"]),
            gas_used: value_u64(body, &["gasUsed", "gas_used"]),
            logs: body.get("logs").cloned().unwrap_or(Value::Array(Vec::new())),
            logs_bloom: value_str(body, &["logsBloom", "logs_bloom"]),
            status: value_status(body),
            transaction_index: value_u64(body, &["transactionIndex", "transaction_index"]),
            created_at: now,
            updated_at: now,
        }
    }

    /// Folds a later receipt payload into this one without discarding known fields.
    pub fn merge(&mut self, newer: TransactionReceiptRecord) {
        self.block_hash = newer.block_hash.or(self.block_hash.take());
        self.block_number = newer.block_number.or(self.block_number);
        self.contract_address = newer.contract_address.or(self.contract_address.take());
        self.cumulative_gas_used = newer.cumulative_gas_used.or(self.cumulative_gas_used);
        self.from = newer.from.or(self.from.take());
        self.to = newer.to.or(self.to.take());
        self.gas_used = newer.gas_used.or(self.gas_used);
        if newer.logs.as_array().is_some_and(|l| !l.is_empty()) {
            self.logs = newer.logs;
        }
        self.logs_bloom = newer.logs_bloom.or(self.logs_bloom.take());
        self.status = newer.status.or(self.status);
        self.transaction_index = newer.transaction_index.or(self.transaction_index);
        self.updated_at = newer.updated_at;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub job_id: String,
    pub message_type: MessageType,
    pub body: Value,
    pub transaction_hash: Option<String>,
    pub duplicate: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub shipment_id: String,
    pub contract_version: Option<String>,
    pub updated_at: i64,
}

fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| v.get(*k))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

fn value_u64(v: &Value, keys: &[&str]) -> Option<u64> {
    let raw = keys.iter().find_map(|k| v.get(*k))?;
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_quantity(s),
        _ => None,
    }
}

fn value_status(v: &Value) -> Option<bool> {
    match v.get("status")? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().map(|n| n == 1),
        Value::String(s) => parse_quantity(s).map(|n| n == 1),
        _ => None,
    }
}

fn parse_quantity(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x") {
        Some(hexv) => u64::from_str_radix(hexv, 16).ok(),
        None => s.parse::<u64>().ok(),
    }
}
