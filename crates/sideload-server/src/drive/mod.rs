//! Storage provider integration.
//!
//! Two seams onto the external file-sharing service:
//!
//! - [`StorageProvider`] acts as the server's own service account. It owns
//!   every app folder and bundle file, and manages who the folders are
//!   shared with.
//! - [`UserDrive`] acts on behalf of a logged-in user with their own OAuth
//!   access token, and is only used to ask "can this user see that folder?".

mod google;
mod service_account;

#[cfg(test)]
pub(crate) mod memory;

use std::fmt;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use axum::body::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio_stream::Stream;

pub use google::{DriveClient, DriveConfig};
pub use service_account::ServiceAccountTokens;

/// Storage provider errors.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Service account authentication failed: {0}")]
    Auth(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriveError {
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404))
    }

    pub const fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }
}

/// Metadata of a stored file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
}

/// File body as it arrives from the provider.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DriveError>> + Send>>;

/// Downloaded file: metadata plus a body that has not been read yet.
pub struct FileContent {
    pub name: String,
    pub mime_type: String,
    pub body: ByteStream,
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileContent")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

/// One principal a folder is shared with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub permission_id: String,
    pub email: Option<String>,
    pub role: String,
}

/// Service-account operations on folders ("groups"), their sharing
/// permissions and the files inside them.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Create a folder and return its id.
    async fn create_group(&self, name: &str) -> Result<String, DriveError>;

    /// Share the folder read-only with `email`; returns the permission id.
    async fn add_user(&self, group_id: &str, email: &str) -> Result<String, DriveError>;

    async fn delete_user(&self, group_id: &str, permission_id: &str) -> Result<(), DriveError>;

    async fn list_users(&self, group_id: &str) -> Result<Vec<Principal>, DriveError>;

    async fn delete_group(&self, group_id: &str) -> Result<(), DriveError>;

    /// Upload the file at `content` into the folder.
    async fn upload(
        &self,
        group_id: &str,
        name: &str,
        mime_type: &str,
        content: &Path,
    ) -> Result<DriveFile, DriveError>;

    async fn download(&self, file_id: &str) -> Result<FileContent, DriveError>;

    async fn delete_file(&self, file_id: &str) -> Result<(), DriveError>;

    /// Rename a file or folder.
    async fn rename(&self, file_id: &str, name: &str) -> Result<(), DriveError>;
}

/// Operations performed with a user's own access token.
#[async_trait]
pub trait UserDrive: Send + Sync {
    /// Whether the token's owner can see `file_id`. A 403/404 from the
    /// provider is `Ok(false)`; anything else unexpected is an error.
    async fn can_view(&self, access_token: &str, file_id: &str) -> Result<bool, DriveError>;
}
