//! Authority Manager.
//!
//! An authority row and the storage provider's sharing permission it
//! mirrors are created and removed together:
//!
//! - grant: external permission first, then the row. If the row cannot be
//!   written the permission is withdrawn again.
//! - revoke: external permission first (already gone counts as done), then
//!   the row. A failure in either step is returned and the row stays, so the
//!   call can simply be repeated.

use sideload_core::config::{email_domain, normalize_email};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::drive::{DriveError, Principal, StorageProvider};
use crate::error::ServerError;
use crate::state::AppState;
use crate::storage::{App, Authority, DatabaseError, NewAuthority, ServerDatabase, User};

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("{0} is already registered.")]
    AlreadyRegistered(String),

    #[error("Email is invalid.")]
    InvalidEmail,

    /// The authority does not exist or belongs to another app.
    #[error("Parameter is invalid.")]
    InvalidParameter,

    #[error(transparent)]
    Storage(#[from] DriveError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<AuthorityError> for ServerError {
    fn from(e: AuthorityError) -> Self {
        match e {
            AuthorityError::AlreadyRegistered(_)
            | AuthorityError::InvalidEmail
            | AuthorityError::InvalidParameter => Self::validation(e.to_string()),
            AuthorityError::Storage(e) => Self::Storage(e),
            AuthorityError::Database(e) => Self::Database(e),
        }
    }
}

pub struct AuthorityManager<'a> {
    db: &'a ServerDatabase,
    storage: &'a dyn StorageProvider,
}

impl<'a> AuthorityManager<'a> {
    pub const fn new(db: &'a ServerDatabase, storage: &'a dyn StorageProvider) -> Self {
        Self { db, storage }
    }

    pub fn from_state(state: &'a AppState) -> Self {
        Self::new(&state.db, state.storage.as_ref())
    }

    /// Let `email` see the app's bundles.
    #[instrument(skip(self, app, actor), fields(app_id = app.id))]
    pub async fn grant(
        &self,
        app: &App,
        email: &str,
        actor: &User,
    ) -> Result<Authority, AuthorityError> {
        let email = normalize_email(email);
        let email = email.as_str();
        if email_domain(email).is_none() {
            return Err(AuthorityError::InvalidEmail);
        }
        if self.db.has_authority_for_email(app.id, email).await? {
            return Err(AuthorityError::AlreadyRegistered(email.to_string()));
        }

        let permission_id = self.storage.add_user(&app.file_id, email).await?;
        let grant = NewAuthority {
            email,
            permission_id: &permission_id,
        };

        match self.db.create_authority(app.id, &grant, actor.id).await {
            Ok(authority) => {
                info!(authority_id = authority.id, "Access granted");
                Ok(authority)
            }
            Err(e) => {
                if let Err(undo) = self.storage.delete_user(&app.file_id, &permission_id).await {
                    warn!(permission_id, error = %undo, "Failed to withdraw orphaned permission");
                }
                match e {
                    DatabaseError::Conflict(_) => {
                        Err(AuthorityError::AlreadyRegistered(email.to_string()))
                    }
                    other => Err(other.into()),
                }
            }
        }
    }

    /// Withdraw an authority. `authority_id` comes from the client and is
    /// checked against `app` before anything is touched.
    #[instrument(skip(self, app, actor), fields(app_id = app.id))]
    pub async fn revoke(
        &self,
        app: &App,
        authority_id: i64,
        actor: &User,
    ) -> Result<(), AuthorityError> {
        let authority = match self.db.get_authority(authority_id).await {
            Ok(a) if a.app_id == app.id => a,
            Ok(_) => {
                warn!(authority_id, "Authority belongs to another app");
                return Err(AuthorityError::InvalidParameter);
            }
            Err(e) if e.is_not_found() => return Err(AuthorityError::InvalidParameter),
            Err(e) => return Err(e.into()),
        };

        match self
            .storage
            .delete_user(&app.file_id, &authority.permission_id)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!(authority_id, "Permission already gone externally");
            }
            Err(e) => return Err(e.into()),
        }

        self.db.delete_authority(authority.id, actor.id).await?;
        info!(authority_id, "Access revoked");
        Ok(())
    }

    pub async fn list(&self, app: &App) -> Result<Vec<Authority>, AuthorityError> {
        Ok(self.db.list_authorities(app.id).await?)
    }

    /// Principals the provider currently reports on the app's folder.
    pub async fn principals(&self, app: &App) -> Result<Vec<Principal>, AuthorityError> {
        Ok(self.storage.list_users(&app.file_id).await?)
    }
}
