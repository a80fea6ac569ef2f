//! Bundle lifecycle.
//!
//! Uploads are spooled to a temporary file, their version is read from the
//! package, then they go to storage and are committed locally afterwards; a
//! failed commit deletes the uploaded file again.

use std::path::Path;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::drive::{DriveError, StorageProvider};
use crate::error::ServerError;
use crate::package;
use crate::state::AppState;
use crate::storage::{App, Bundle, BundlePage, DatabaseError, NewBundle, Platform, ServerDatabase};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("File is required.")]
    MissingFile,

    #[error("File extension is not valid.")]
    InvalidExtension,

    #[error("Cannot parse application package file.")]
    Unparseable,

    #[error(transparent)]
    Storage(#[from] DriveError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<BundleError> for ServerError {
    fn from(e: BundleError) -> Self {
        match e {
            BundleError::MissingFile
            | BundleError::InvalidExtension
            | BundleError::Unparseable => Self::validation(e.to_string()),
            BundleError::Storage(e) => Self::Storage(e),
            BundleError::Database(e) => Self::Database(e),
        }
    }
}

/// A received package, spooled to disk.
#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub size: u64,
    pub temp: NamedTempFile,
}

impl UploadedFile {
    pub fn path(&self) -> &Path {
        self.temp.path()
    }
}

/// An upload as received from a form or the CI API.
#[derive(Debug, Default)]
pub struct BundleUpload {
    pub file: Option<UploadedFile>,
    /// Replaces the version read from the package when non-empty.
    pub bundle_version: Option<String>,
    pub description: String,
}

impl BundleUpload {
    /// Every problem with the upload, in field order.
    pub fn problems(&self) -> Vec<BundleError> {
        let mut problems = Vec::new();
        match &self.file {
            Some(file) if !file.file_name.is_empty() && file.size > 0 => {
                if Platform::from_file_name(&file.file_name).is_none() {
                    problems.push(BundleError::InvalidExtension);
                }
            }
            _ => problems.push(BundleError::MissingFile),
        }
        problems
    }

    fn version_override(&self) -> Option<String> {
        self.bundle_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    }
}

/// Version to record for `file`: the override if given, else what the
/// package declares. An unreadable package is rejected either way.
async fn resolve_version(
    file: &UploadedFile,
    platform: Platform,
    version_override: Option<String>,
) -> Result<String, ServerError> {
    let path = file.path().to_path_buf();
    let inspected = tokio::task::spawn_blocking(move || package::inspect(&path, platform))
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    let declared = match inspected {
        Ok(info) => info.version,
        Err(e) => {
            info!(file_name = %file.file_name, error = %e, "Rejected unreadable package");
            return Err(BundleError::Unparseable.into());
        }
    };
    version_override
        .or(declared)
        .ok_or_else(|| BundleError::Unparseable.into())
}

/// `app_{app}_ver_{version}_rev_{revision}{ext}`
pub fn stored_file_name(app_id: i64, version: &str, revision: i64, platform: Platform) -> String {
    format!(
        "app_{app_id}_ver_{version}_rev_{revision}{}",
        platform.extension()
    )
}

pub struct BundleService<'a> {
    db: &'a ServerDatabase,
    storage: &'a dyn StorageProvider,
}

impl<'a> BundleService<'a> {
    pub const fn new(db: &'a ServerDatabase, storage: &'a dyn StorageProvider) -> Self {
        Self { db, storage }
    }

    pub fn from_state(state: &'a AppState) -> Self {
        Self::new(&state.db, state.storage.as_ref())
    }

    /// Validate, store and record an upload. `user_id` is `None` for CI
    /// uploads authenticated by API token.
    #[instrument(
        skip(self, app, upload),
        fields(app_id = app.id, size = upload.file.as_ref().map_or(0, |f| f.size))
    )]
    pub async fn upload(
        &self,
        app: &App,
        upload: BundleUpload,
        user_id: Option<i64>,
    ) -> Result<Bundle, ServerError> {
        let problems = upload.problems();
        if !problems.is_empty() {
            return Err(ServerError::Validation(
                problems.iter().map(ToString::to_string).collect(),
            ));
        }
        let file = upload.file.as_ref().ok_or(BundleError::MissingFile)?;
        let platform =
            Platform::from_file_name(&file.file_name).ok_or(BundleError::InvalidExtension)?;
        let version = resolve_version(file, platform, upload.version_override()).await?;
        let version = version.as_str();

        let predicted = self.db.peek_next_revision(app.id, version).await?;
        let name = stored_file_name(app.id, version, predicted, platform);
        let stored = self
            .storage
            .upload(&app.file_id, &name, platform.content_type(), file.path())
            .await?;

        let new = NewBundle {
            app_id: app.id,
            file_id: &stored.id,
            platform,
            bundle_version: version,
            description: upload.description.trim(),
        };
        let bundle = match self.db.create_bundle(&new, user_id).await {
            Ok(bundle) => bundle,
            Err(e) => {
                if let Err(undo) = self.storage.delete_file(&stored.id).await {
                    warn!(file_id = %stored.id, error = %undo, "Failed to remove orphaned upload");
                }
                return Err(e.into());
            }
        };

        if bundle.revision != predicted {
            // A concurrent upload took the predicted revision.
            let name = stored_file_name(app.id, version, bundle.revision, platform);
            if let Err(e) = self.storage.rename(&stored.id, &name).await {
                warn!(bundle_id = bundle.id, error = %e, "Failed to rename uploaded file");
            }
        }

        info!(bundle_id = bundle.id, revision = bundle.revision, "Bundle uploaded");
        Ok(bundle)
    }

    pub async fn update_description(
        &self,
        bundle: &Bundle,
        description: &str,
    ) -> Result<Bundle, BundleError> {
        Ok(self
            .db
            .update_bundle_description(bundle.id, description.trim())
            .await?)
    }

    /// Remove the stored file (already gone is fine), then the row.
    #[instrument(skip(self, bundle), fields(bundle_id = bundle.id))]
    pub async fn delete(&self, bundle: &Bundle, user_id: Option<i64>) -> Result<(), BundleError> {
        match self.storage.delete_file(&bundle.file_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.db.delete_bundle(bundle.id, user_id).await?;
        info!("Bundle deleted");
        Ok(())
    }

    pub async fn page(&self, app: &App, page: u32, limit: u32) -> Result<BundlePage, BundleError> {
        Ok(self.db.list_bundles_page(app.id, page, limit).await?)
    }
}
