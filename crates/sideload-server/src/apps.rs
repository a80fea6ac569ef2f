//! App lifecycle.
//!
//! Every app owns one storage folder. The folder is created before the row
//! and deleted after everything inside it, row included, is gone.

use sideload_core::Settings;
use sideload_crypto::generate_api_token;
use tracing::{info, instrument, warn};

use crate::drive::{DriveError, StorageProvider};
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;
use crate::storage::{App, NewApp, NewAuthority, ServerDatabase, User};

pub const TITLE_REQUIRED: &str = "Title is required.";

pub struct AppService<'a> {
    db: &'a ServerDatabase,
    storage: &'a dyn StorageProvider,
    settings: &'a Settings,
}

/// Treat "already gone" as success when tearing things down.
fn tolerate_missing(result: Result<(), DriveError>) -> Result<(), DriveError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

fn validate_title(title: &str) -> ServerResult<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ServerError::validation(TITLE_REQUIRED));
    }
    Ok(title)
}

impl<'a> AppService<'a> {
    pub const fn new(
        db: &'a ServerDatabase,
        storage: &'a dyn StorageProvider,
        settings: &'a Settings,
    ) -> Self {
        Self {
            db,
            storage,
            settings,
        }
    }

    pub fn from_state(state: &'a AppState) -> Self {
        Self::new(&state.db, state.storage.as_ref(), &state.settings)
    }

    fn folder_name(&self, title: &str) -> String {
        format!("{} - {title}", self.settings.organization_name)
    }

    /// Apps the user can see, newest first.
    pub async fn list_for(&self, user: &User) -> ServerResult<Vec<App>> {
        Ok(self.db.list_apps_for_email(&user.email).await?)
    }

    #[instrument(skip(self, description, creator), fields(user_id = creator.id))]
    pub async fn create(
        &self,
        creator: &User,
        title: &str,
        description: &str,
    ) -> ServerResult<App> {
        let title = validate_title(title)?;
        let folder_id = self.storage.create_group(&self.folder_name(title)).await?;

        let created = async {
            let permission_id = self.storage.add_user(&folder_id, &creator.email).await?;
            let api_token = generate_api_token();
            let app = self
                .db
                .create_app(
                    &NewApp {
                        title,
                        description: description.trim(),
                        file_id: &folder_id,
                        api_token: &api_token,
                    },
                    &NewAuthority {
                        email: &creator.email,
                        permission_id: &permission_id,
                    },
                    creator.id,
                )
                .await?;
            Ok::<_, ServerError>(app)
        }
        .await;

        match created {
            Ok(app) => {
                info!(app_id = app.id, "App created");
                Ok(app)
            }
            Err(e) => {
                // Removing the folder also drops any permission on it.
                if let Err(undo) = self.storage.delete_group(&folder_id).await {
                    warn!(folder_id, error = %undo, "Failed to remove orphaned folder");
                }
                Err(e)
            }
        }
    }

    /// Change title and description; the folder is renamed to match.
    #[instrument(skip(self, app, description), fields(app_id = app.id))]
    pub async fn update(&self, app: &App, title: &str, description: &str) -> ServerResult<App> {
        let title = validate_title(title)?;
        if title != app.title {
            self.storage
                .rename(&app.file_id, &self.folder_name(title))
                .await?;
        }
        Ok(self.db.update_app(app.id, title, description.trim()).await?)
    }

    pub async fn refresh_token(&self, app: &App) -> ServerResult<App> {
        let app = self.db.update_api_token(app.id, &generate_api_token()).await?;
        info!(app_id = app.id, "API token regenerated");
        Ok(app)
    }

    /// Tear an app down: bundle files, sharing permissions, rows, and only
    /// then the folder itself.
    #[instrument(skip(self, app, actor), fields(app_id = app.id))]
    pub async fn delete(&self, app: &App, actor: &User) -> ServerResult<()> {
        for bundle in self.db.list_all_bundles(app.id).await? {
            tolerate_missing(self.storage.delete_file(&bundle.file_id).await)?;
        }
        for authority in self.db.list_authorities(app.id).await? {
            tolerate_missing(
                self.storage
                    .delete_user(&app.file_id, &authority.permission_id)
                    .await,
            )?;
        }

        self.db.delete_app(app.id, actor.id).await?;
        tolerate_missing(self.storage.delete_group(&app.file_id).await)?;

        info!("App deleted");
        Ok(())
    }
}
