//! Scriptable identity provider for tests.
//!
//! Access tokens are the same strings [`MemoryDrive`](crate::drive::memory)
//! understands, so a fake login lines up with fake folder permissions.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use sideload_core::db::unix_timestamp;

use super::identity::{IdentityError, IdentityProvider, OAuthToken, TokenInfo};
use crate::drive::memory::user_token;

const ACCESS_PREFIX: &str = "access-token:";
const REFRESH_PREFIX: &str = "refresh-token:";

#[derive(Debug, Default)]
pub struct FakeIdentity {
    codes: Mutex<HashMap<String, String>>,
    revoked: Mutex<HashSet<String>>,
    outage: AtomicBool,
    exchanges: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FakeIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `code` exchangeable for a token belonging to `email`.
    pub fn with_code(&self, code: &str, email: &str) {
        self.codes
            .lock()
            .unwrap()
            .insert(code.to_string(), email.to_string());
    }

    /// A token as the provider would hand it out for `email`.
    pub fn token_for(email: &str) -> OAuthToken {
        OAuthToken {
            access_token: user_token(email),
            refresh_token: Some(format!("{REFRESH_PREFIX}{email}")),
            expires_at: Some(unix_timestamp() + 3600),
        }
    }

    /// Every later check of `email`'s tokens answers 401.
    pub fn revoke(&self, email: &str) {
        self.revoked.lock().unwrap().insert(email.to_string());
    }

    /// Answer 503 to every token check while set.
    pub fn set_outage(&self, on: bool) {
        self.outage.store(on, Ordering::SeqCst);
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn rejected(message: &str) -> IdentityError {
        IdentityError::Provider {
            status: 400,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    fn authorization_url(&self, state: &str) -> String {
        format!(
            "https://accounts.test/auth?state={}",
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthToken, IdentityError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let email = self
            .codes
            .lock()
            .unwrap()
            .remove(code)
            .ok_or_else(|| Self::rejected("invalid_grant"))?;
        Ok(Self::token_for(&email))
    }

    async fn refresh(&self, token: &OAuthToken) -> Result<OAuthToken, IdentityError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let email = token
            .refresh_token
            .as_deref()
            .and_then(|t| t.strip_prefix(REFRESH_PREFIX))
            .ok_or_else(|| Self::rejected("invalid_grant"))?;
        if self.revoked.lock().unwrap().contains(email) {
            return Err(Self::rejected("invalid_grant"));
        }
        Ok(Self::token_for(email))
    }

    async fn token_info(&self, access_token: &str) -> Result<TokenInfo, IdentityError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(IdentityError::Provider {
                status: 503,
                message: "unavailable".into(),
            });
        }
        let email = access_token
            .strip_prefix(ACCESS_PREFIX)
            .ok_or_else(|| Self::rejected("invalid_token"))?;
        if self.revoked.lock().unwrap().contains(email) {
            return Err(IdentityError::Provider {
                status: 401,
                message: "invalid_token".into(),
            });
        }
        Ok(TokenInfo {
            email: email.to_string(),
            expires_in: Some(3600),
        })
    }
}
