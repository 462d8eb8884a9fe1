//! ID generation for trace issues.

use crate::store::StoreError;
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Attempts before giving up on finding a free id.
pub const MAX_ID_RETRIES: usize = 10;

/// Length of the base-36 suffix.
pub const SUFFIX_LEN: usize = 6;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a collision-resistant id of the form "{prefix}-{6 base36 chars}".
///
/// Entropy is SHA256(seed + nanosecond timestamp + 16 random bytes), so two
/// calls with the same seed still differ. Candidates found in `existing` are
/// regenerated; after [`MAX_ID_RETRIES`] attempts the call fails with
/// [`StoreError::GenerationExhausted`].
pub fn generate_id(seed: &str, prefix: &str, existing: &HashSet<String>) -> Result<String, StoreError> {
    generate_id_with(seed, prefix, |candidate| existing.contains(candidate))
}

/// Like [`generate_id`], with the collision check supplied by the caller.
pub fn generate_id_with<F>(seed: &str, prefix: &str, is_taken: F) -> Result<String, StoreError>
where
    F: Fn(&str) -> bool,
{
    for attempt in 0..MAX_ID_RETRIES {
        let id = format!("{}-{}", prefix, suffix(seed));
        if !is_taken(&id) {
            return Ok(id);
        }
        log::debug!("id collision on {} (attempt {})", id, attempt + 1);
    }

    Err(StoreError::GenerationExhausted {
        prefix: prefix.to_string(),
        attempts: MAX_ID_RETRIES,
    })
}

fn suffix(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    hasher.update(rand::rng().random::<[u8; 16]>());
    let hash = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    to_base36(u64::from_be_bytes(bytes) % 36u64.pow(SUFFIX_LEN as u32), SUFFIX_LEN)
}

/// Encode `n` in lowercase base 36, left-padded with zeros to `width`.
fn to_base36(mut n: u64, width: usize) -> String {
    let mut out = vec![b'0'; width];
    for slot in out.iter_mut().rev() {
        *slot = BASE36[(n % 36) as usize];
        n /= 36;
    }
    // Only ASCII digits and letters are written.
    String::from_utf8(out).unwrap_or_default()
}

/// Turn a display name into an id prefix.
///
/// Lowercases, turns whitespace and underscores into hyphens, replaces any
/// other character outside `[a-z0-9-]` with a hyphen, collapses repeats and
/// trims hyphens from both ends.
pub fn sanitize_prefix(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches('-').to_string()
}

/// Check that `id` is exactly "{prefix}-" followed by a 6-character suffix.
///
/// `proj-abc123` belongs to `proj`, but `proj-extra-abc123` does not.
pub fn belongs_to_prefix(id: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    match id.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('-')) {
        Some(rest) => rest.len() == SUFFIX_LEN && rest.chars().all(|c| c.is_ascii_alphanumeric()),
        None => false,
    }
}

/// The prefix an id was generated under, if it has the "{prefix}-{suffix}" shape.
pub fn prefix_of(id: &str) -> Option<&str> {
    let (prefix, _) = id.rsplit_once('-')?;
    belongs_to_prefix(id, prefix).then_some(prefix)
}
