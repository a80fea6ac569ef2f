//! Login: identity provider client, sessions and the OAuth round trip.

pub mod flow;
mod google;
mod identity;
mod session;

#[cfg(test)]
pub(crate) mod fake;

pub use flow::{CallbackQuery, LoginContext};
pub use google::{GoogleIdentity, GoogleOAuthConfig};
pub use identity::{IdentityError, IdentityProvider, OAuthToken, TokenInfo};
pub use session::{SESSION_COOKIE, Session, SessionData, SessionStore, session_layer};
