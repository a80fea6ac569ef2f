//! OAuth 2.0 web-server flow against Google-style endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use sideload_core::db::unix_timestamp;
use url::Url;

use super::identity::{IdentityError, IdentityProvider, OAuthToken, TokenInfo};

pub const EMAIL_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";
pub const DRIVE_METADATA_SCOPE: &str = "https://www.googleapis.com/auth/drive.metadata.readonly";

#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub tokeninfo_url: String,
    pub scopes: Vec<String>,
}

impl GoogleOAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            auth_url: "https://accounts.google.com/o/oauth2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            tokeninfo_url: "https://www.googleapis.com/oauth2/v1/tokeninfo".into(),
            scopes: vec![EMAIL_SCOPE.into(), DRIVE_METADATA_SCOPE.into()],
        }
    }

    /// Point every endpoint at another origin (used by tests).
    #[must_use]
    pub fn with_endpoint_base(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.auth_url = format!("{base}/o/oauth2/auth");
        self.token_url = format!("{base}/token");
        self.tokeninfo_url = format!("{base}/tokeninfo");
        self
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenInfoResponse {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug)]
pub struct GoogleIdentity {
    http: reqwest::Client,
    config: GoogleOAuthConfig,
    auth_url: Url,
}

impl GoogleIdentity {
    pub fn new(config: GoogleOAuthConfig, timeout: Duration) -> Result<Self, IdentityError> {
        if config.client_id.is_empty() {
            return Err(IdentityError::Config("client_id is empty".into()));
        }
        if config.client_secret.is_empty() {
            return Err(IdentityError::Config("client_secret is empty".into()));
        }
        Url::parse(&config.redirect_url)
            .map_err(|e| IdentityError::Config(format!("redirect_url: {e}")))?;
        let auth_url = Url::parse(&config.auth_url)
            .map_err(|e| IdentityError::Config(format!("auth_url: {e}")))?;

        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            config,
            auth_url,
        })
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, IdentityError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter().copied())
            .finish();

        let resp = self
            .http
            .post(&self.config.token_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        resp.json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentity {
    fn authorization_url(&self, state: &str) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("approval_prompt", "force");
        url.into()
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthToken, IdentityError> {
        let now = unix_timestamp();
        let token = self
            .post_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
                ("redirect_uri", &self.config.redirect_url),
            ])
            .await?;
        Ok(OAuthToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|secs| now + secs),
        })
    }

    async fn refresh(&self, token: &OAuthToken) -> Result<OAuthToken, IdentityError> {
        let Some(refresh_token) = token.refresh_token.as_deref() else {
            return Err(IdentityError::Provider {
                status: 400,
                message: "no refresh token".into(),
            });
        };
        let now = unix_timestamp();
        let fresh = self
            .post_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
            ])
            .await?;
        Ok(OAuthToken {
            access_token: fresh.access_token,
            // Refresh responses usually omit the refresh token; keep ours.
            refresh_token: fresh.refresh_token.or_else(|| token.refresh_token.clone()),
            expires_at: fresh.expires_in.map(|secs| now + secs),
        })
    }

    async fn token_info(&self, access_token: &str) -> Result<TokenInfo, IdentityError> {
        let mut url = Url::parse(&self.config.tokeninfo_url)
            .map_err(|e| IdentityError::Config(format!("tokeninfo_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("access_token", access_token);

        let resp = self.http.get(url).send().await?;
        let info: TokenInfoResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;

        let email = info
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| IdentityError::InvalidResponse("token info has no email".into()))?;
        Ok(TokenInfo {
            email,
            expires_in: info.expires_in,
        })
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, IdentityError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .ok()
        .and_then(|e| e.error_description.or(e.error))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
    Err(IdentityError::Provider {
        status: status.as_u16(),
        message,
    })
}
