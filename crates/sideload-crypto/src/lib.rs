//! Sideload credential primitives.
//!
//! - **Signed links**: HMAC-SHA256 over method, host, path, a random token
//!   and an expiry, so a download URL can be handed to an unauthenticated
//!   client and checked later without a session lookup
//! - **Credentials**: random API tokens and OAuth state keys
//!
//! All comparisons of secret material go through `subtle`.

pub mod credential;
pub mod error;
pub mod signed_link;

pub use credential::{constant_time_str_eq, generate_api_token, generate_state_key};
pub use error::CryptoError;
pub use signed_link::{
    LIMIT_PARAM, LINK_TTL, LinkBinding, LinkParams, LinkSigner, SIGNATURE_PARAM, SignedLink,
    SignedRequest, TOKEN_PARAM,
};
#[cfg(any(test, feature = "test-utils"))]
pub use signed_link::test_signer;
