//! Identity provider seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Identity provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IdentityError {
    /// A 4xx from the provider: the token or code is no good and the user
    /// has to log in again.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Provider { status: 400..=499, .. })
    }
}

/// OAuth token as kept in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds; `None` when the provider did not say.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl OAuthToken {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn to_session_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// `None` for an empty or unparsable stored value.
    pub fn from_session_string(raw: &str) -> Option<Self> {
        serde_json::from_str::<Self>(raw)
            .ok()
            .filter(|t| !t.access_token.is_empty())
    }
}

/// What the provider says about an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub email: String,
    pub expires_in: Option<i64>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Consent-screen URL carrying `state` back to the callback.
    fn authorization_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<OAuthToken, IdentityError>;

    async fn refresh(&self, token: &OAuthToken) -> Result<OAuthToken, IdentityError>;

    async fn token_info(&self, access_token: &str) -> Result<TokenInfo, IdentityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_classification() {
        let expired = IdentityError::Provider {
            status: 401,
            message: "invalid_token".into(),
        };
        assert!(expired.is_client_error());

        let outage = IdentityError::Provider {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(!outage.is_client_error());
        assert!(!IdentityError::InvalidResponse("x".into()).is_client_error());
    }

    #[test]
    fn token_session_string() {
        let token = OAuthToken {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: Some(100),
        };
        let raw = token.to_session_string().unwrap();
        assert_eq!(OAuthToken::from_session_string(&raw), Some(token));

        assert_eq!(OAuthToken::from_session_string(""), None);
        assert_eq!(OAuthToken::from_session_string("{not json"), None);
        assert_eq!(
            OAuthToken::from_session_string(r#"{"access_token":""}"#),
            None
        );
    }

    #[test]
    fn expiry() {
        let token = OAuthToken {
            access_token: "at".into(),
            refresh_token: None,
            expires_at: Some(100),
        };
        assert!(!token.is_expired_at(99));
        assert!(token.is_expired_at(100));

        let open = OAuthToken {
            expires_at: None,
            ..token
        };
        assert!(!open.is_expired_at(i64::MAX));
    }
}
