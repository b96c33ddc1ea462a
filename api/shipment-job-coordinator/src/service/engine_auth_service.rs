//! Signatures on Engine callbacks.
//!
//! A callback signature covers the job id from the callback URL as well as
//! the body, so a captured ERROR for one job cannot be replayed against another.

use sha2::{Digest, Sha256};

pub const ENGINE_SIGNATURE_HEADER: &str = "x-engine-signature";

fn digest(job_id: &str, payload: &str, secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(job_id.as_bytes());
    hasher.update(b":");
    hasher.update(payload.as_bytes());
    hasher.finalize().into()
}

/// `hex(sha256(secret ":" job_id ":" payload))`.
pub fn engine_signature(job_id: &str, payload: &str, secret: &str) -> String {
    hex::encode(digest(job_id, payload, secret))
}

pub fn verify_engine_signature(
    job_id: &str,
    payload: &str,
    signature_hex: &str,
    secret: &str,
) -> Result<(), String> {
    let provided = hex::decode(signature_hex.trim())
        .map_err(|_| "engine signature is not hex".to_string())?;
    if provided.as_slice() == digest(job_id, payload, secret).as_slice() {
        Ok(())
    } else {
        Err("engine signature verification failed".to_string())
    }
}
