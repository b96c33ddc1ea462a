use ethers::types::H256;
use sha2::{Digest, Sha256};
use std::str::FromStr;

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical form of a transaction hash: `0x` followed by 64 lowercase hex digits.
pub fn normalize_tx_hash(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    let prefixed = if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        format!("0x{}", &trimmed[2..])
    } else {
        format!("0x{trimmed}")
    };
    H256::from_str(&prefixed)
        .map(|h| format!("{h:#x}"))
        .map_err(|e| format!("invalid transaction hash {trimmed:?}: {e}"))
}
