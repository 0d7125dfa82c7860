//! Stable short digests for match signatures, batch ids and delivery keys.

use sha2::{Digest, Sha256};

/// Hex length of the truncated digests used as identifiers.
pub const DIGEST_HEX_LEN: usize = 16;

/// SHA-256 over `parts` joined by a unit separator, truncated to
/// [`DIGEST_HEX_LEN`] hex chars. Deterministic across processes, so ids
/// derived from it survive a crash and replay.
pub fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let out = hasher.finalize();
    let mut hex = String::with_capacity(DIGEST_HEX_LEN);
    for byte in out.iter().take(DIGEST_HEX_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}
