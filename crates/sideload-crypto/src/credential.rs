//! Random credentials and constant-time comparison.

use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

/// Bytes of entropy in an app's API token (hex-encoded to 64 chars).
pub const API_TOKEN_BYTES: usize = 32;

/// Bytes of entropy in an OAuth anti-CSRF state key.
pub const STATE_KEY_BYTES: usize = 16;

/// `len` random bytes from the OS, hex-encoded.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// New long-lived API token for an app.
pub fn generate_api_token() -> String {
    random_hex(API_TOKEN_BYTES)
}

/// New per-login anti-CSRF key, stored in the session and echoed in `state`.
pub fn generate_state_key() -> String {
    random_hex(STATE_KEY_BYTES)
}

/// Constant-time string comparison.
///
/// Length differences return `false` immediately; only the contents are
/// compared in constant time.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
