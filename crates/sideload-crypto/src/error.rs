//! Crypto error types.

/// Errors from signing and verification.
///
/// Verification reports a wrong or expired signature as `Ok(false)`; these
/// variants are reserved for input that cannot be interpreted at all.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Signing secret must not be empty")]
    EmptySecret,

    #[error("Missing parameter: {0}")]
    MissingField(&'static str),

    #[error("Invalid hex in {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("MAC initialisation failed: {0}")]
    KeyInit(String),
}
