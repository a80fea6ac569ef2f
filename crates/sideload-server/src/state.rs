//! Shared handler state.

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sideload_core::Settings;
use sideload_crypto::LinkSigner;

use crate::auth::{IdentityProvider, SessionStore};
use crate::drive::{StorageProvider, UserDrive};
use crate::storage::ServerDatabase;

/// Everything a request handler may need. Cheap to clone; all members are
/// read-only after startup except the session store.
#[derive(Clone)]
pub struct AppState {
    pub db: ServerDatabase,
    pub settings: Arc<Settings>,
    pub signer: Arc<LinkSigner>,
    pub sessions: SessionStore,
    pub identity: Arc<dyn IdentityProvider>,
    /// Service-account scope.
    pub storage: Arc<dyn StorageProvider>,
    /// User-token scope.
    pub user_drive: Arc<dyn UserDrive>,
    pub cookie_key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
