//! Request signing for gateway HTTP calls.

use sha2::{Digest, Sha256};

/// Deterministic request signature over the gateway's canonical
/// `token&timestamp&appKey&data` string.
///
/// The token fragment is the part of the session cookie token before the
/// first `_`.
#[must_use]
pub fn request_sign(token_fragment: &str, timestamp_ms: i64, app_key: &str, data: &str) -> String {
    let canonical = format!("{token_fragment}&{timestamp_ms}&{app_key}&{data}");
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
