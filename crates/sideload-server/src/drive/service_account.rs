//! Service-account access tokens.
//!
//! Mints a short-lived bearer token by posting an RS256-signed JWT
//! assertion to the key file's token endpoint, and caches it process-wide
//! until shortly before it expires.

use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use sideload_core::ServiceAccountKey;
use sideload_core::db::unix_timestamp;
use tokio::sync::Mutex;
use tracing::debug;

use super::DriveError;

/// Full read/write access to files the service account owns.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECS: i64 = 3600;
/// Refresh this many seconds before the provider's stated expiry.
const EXPIRY_SLACK_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokens")
            .field("client_email", &self.key.client_email)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokens {
    pub fn new(key: ServiceAccountKey, timeout: Duration) -> Result<Self, DriveError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| DriveError::Config(format!("service account private key: {e}")))?;

        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            key,
            encoding_key,
            scope: DRIVE_SCOPE.to_string(),
            http,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// A bearer token valid for at least the next minute.
    pub async fn access_token(&self) -> Result<String, DriveError> {
        let mut cached = self.cached.lock().await;
        let now = unix_timestamp();
        if let Some(token) = cached
            .as_ref()
            .filter(|t| t.expires_at - EXPIRY_SLACK_SECS > now)
        {
            return Ok(token.access_token.clone());
        }

        let fresh = self.fetch(now).await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    fn assertion(&self, now: i64) -> Result<String, DriveError> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| DriveError::Auth(format!("signing assertion: {e}")))
    }

    async fn fetch(&self, now: i64) -> Result<CachedToken, DriveError> {
        let assertion = self.assertion(now)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", GRANT_TYPE)
            .append_pair("assertion", &assertion)
            .finish();

        let resp = self
            .http
            .post(&self.key.token_uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(DriveError::Auth(format!(
                "token endpoint returned {}: {detail}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| DriveError::InvalidResponse(e.to_string()))?;

        debug!(expires_in = token.expires_in, "Service account token refreshed");
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now + token.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_private_key_is_config_error() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email":"svc@example.com","private_key":"not a pem"}"#,
        )
        .unwrap();
        let err = ServiceAccountTokens::new(key, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, DriveError::Config(_)));
    }
}
