//! Deterministic percentage ramp-up via stable SHA-256 bucketing (C4).

use sha2::{Digest, Sha256};

/// Number of buckets a stable id can fall into: `[0, BUCKET_SPACE)`.
pub const BUCKET_SPACE: u32 = 10_000;

/// A sentinel bucket used when a context carries no stable id but the
/// matched rule does not require one. Chosen as the maximum real bucket
/// value so it matches a 100.00% ramp-up (the only ramp-up value whose
/// threshold reaches `BUCKET_SPACE` at the declared 0.01% resolution) but
/// never a ramp-up strictly below 100%.
pub const FALLBACK_BUCKET: u32 = BUCKET_SPACE - 1;

/// Compute the deterministic bucket for `(salt, flag_key, stable_id)`.
///
/// `SHA-256(salt || ':' || flag_key || ':' || stable_id)`, taking the first
/// four bytes as a big-endian u32 and reducing modulo [`BUCKET_SPACE`].
pub fn bucket_of(salt: &str, flag_key: &str, stable_id: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(flag_key.as_bytes());
    hasher.update(b":");
    hasher.update(stable_id.as_bytes());
    let digest = hasher.finalize();
    let v = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    v % BUCKET_SPACE
}

/// Whether `bucket` falls within a ramp-up of `ramp_up` percent
/// (`ramp_up` in `[0.0, 100.0]`, 0.01% resolution).
pub fn is_in_ramp_up(ramp_up: f64, bucket: u32) -> bool {
    let threshold = (ramp_up * 100.0).round() as i64;
    (bucket as i64) < threshold
}
