//! Database queries for users, apps, authorities and audits.

use sideload_core::config::normalize_email;
use sideload_core::db::unix_timestamp;
use sqlx::SqliteConnection;

use super::db::{DatabaseError, ServerDatabase};
use super::models::{ActionKind, App, Audit, Authority, ResourceKind, User};

/// Columns for a new app row; the storage folder must already exist.
#[derive(Debug, Clone)]
pub struct NewApp<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub file_id: &'a str,
    pub api_token: &'a str,
}

/// An external grant that has already been created.
#[derive(Debug, Clone)]
pub struct NewAuthority<'a> {
    pub email: &'a str,
    pub permission_id: &'a str,
}

impl ServerDatabase {
    // =========================================================================
    // User queries
    // =========================================================================

    /// Return the user with `email`, creating the row on first sight.
    pub async fn find_or_create_user(&self, email: &str) -> Result<User, DatabaseError> {
        let email = normalize_email(email);
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO users (email, created_at, updated_at) \
             VALUES (?, ?, ?) ON CONFLICT(email) DO NOTHING",
        )
        .bind(&email)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(&email)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user)
    }

    pub async fn get_user(&self, id: i64) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User {id}")))
    }

    // =========================================================================
    // App queries
    // =========================================================================

    /// Insert an app together with its creator's authority and an audit
    /// entry, all in one transaction.
    pub async fn create_app(
        &self,
        app: &NewApp<'_>,
        owner: &NewAuthority<'_>,
        user_id: i64,
    ) -> Result<App, DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        let app_id = sqlx::query(
            "INSERT INTO apps (title, description, file_id, api_token, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(app.title)
        .bind(app.description)
        .bind(app.file_id)
        .bind(app.api_token)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        insert_authority_row(&mut *tx, app_id, owner, now).await?;
        insert_audit(
            &mut *tx,
            Some(user_id),
            ResourceKind::App,
            app_id,
            ActionKind::Create,
        )
        .await?;

        tx.commit().await?;
        self.get_app(app_id).await
    }

    pub async fn get_app(&self, id: i64) -> Result<App, DatabaseError> {
        sqlx::query_as::<_, App>("SELECT * FROM apps WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("App {id}")))
    }

    pub async fn get_app_by_api_token(&self, api_token: &str) -> Result<App, DatabaseError> {
        sqlx::query_as::<_, App>("SELECT * FROM apps WHERE api_token = ?")
            .bind(api_token)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound("App with api token".into()))
    }

    /// Apps on which `email` holds an authority, newest first.
    pub async fn list_apps_for_email(&self, email: &str) -> Result<Vec<App>, DatabaseError> {
        let apps = sqlx::query_as::<_, App>(
            "SELECT apps.* FROM apps \
             JOIN authorities ON authorities.app_id = apps.id \
             WHERE authorities.email = ? \
             ORDER BY apps.id DESC",
        )
        .bind(email)
        .fetch_all(self.pool())
        .await?;
        Ok(apps)
    }

    pub async fn update_app(
        &self,
        id: i64,
        title: &str,
        description: &str,
    ) -> Result<App, DatabaseError> {
        let result = sqlx::query(
            "UPDATE apps SET title = ?, description = ?, updated_at = ? WHERE id = ?",
        )
        .bind(title)
        .bind(description)
        .bind(unix_timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("App {id}")));
        }
        self.get_app(id).await
    }

    pub async fn update_api_token(&self, id: i64, api_token: &str) -> Result<App, DatabaseError> {
        let result = sqlx::query("UPDATE apps SET api_token = ?, updated_at = ? WHERE id = ?")
            .bind(api_token)
            .bind(unix_timestamp())
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("App {id}")));
        }
        self.get_app(id).await
    }

    /// Delete an app's bundles, authorities, revision counters and the app
    /// row itself, recording an audit entry. External counterparts must be
    /// gone already.
    pub async fn delete_app(&self, id: i64, user_id: i64) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM bundles WHERE app_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM authorities WHERE app_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM apps WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("App {id}")));
        }
        insert_audit(
            &mut *tx,
            Some(user_id),
            ResourceKind::App,
            id,
            ActionKind::Delete,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Authority queries
    // =========================================================================

    pub async fn list_authorities(&self, app_id: i64) -> Result<Vec<Authority>, DatabaseError> {
        let authorities =
            sqlx::query_as::<_, Authority>("SELECT * FROM authorities WHERE app_id = ? ORDER BY id")
                .bind(app_id)
                .fetch_all(self.pool())
                .await?;
        Ok(authorities)
    }

    pub async fn get_authority(&self, id: i64) -> Result<Authority, DatabaseError> {
        sqlx::query_as::<_, Authority>("SELECT * FROM authorities WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Authority {id}")))
    }

    pub async fn has_authority_for_email(
        &self,
        app_id: i64,
        email: &str,
    ) -> Result<bool, DatabaseError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM authorities WHERE app_id = ? AND email = ?")
                .bind(app_id)
                .bind(email)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.is_some())
    }

    /// Whether `email` holds an authority on any app.
    pub async fn has_any_authority(&self, email: &str) -> Result<bool, DatabaseError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM authorities WHERE email = ? LIMIT 1")
                .bind(email)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.is_some())
    }

    /// Persist an authority whose external grant already exists.
    pub async fn create_authority(
        &self,
        app_id: i64,
        grant: &NewAuthority<'_>,
        user_id: i64,
    ) -> Result<Authority, DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        let id = insert_authority_row(&mut *tx, app_id, grant, now).await?;
        insert_audit(
            &mut *tx,
            Some(user_id),
            ResourceKind::Authority,
            id,
            ActionKind::Create,
        )
        .await?;

        tx.commit().await?;
        self.get_authority(id).await
    }

    pub async fn delete_authority(&self, id: i64, user_id: i64) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query("DELETE FROM authorities WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Authority {id}")));
        }
        insert_audit(
            &mut *tx,
            Some(user_id),
            ResourceKind::Authority,
            id,
            ActionKind::Delete,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Audit queries
    // =========================================================================

    /// Record a standalone audit entry (downloads carry no user).
    pub async fn record_audit(
        &self,
        user_id: Option<i64>,
        resource: ResourceKind,
        resource_id: i64,
        action: ActionKind,
    ) -> Result<(), DatabaseError> {
        let mut conn = self.pool().acquire().await?;
        insert_audit(&mut *conn, user_id, resource, resource_id, action).await
    }

    pub async fn list_audits(
        &self,
        resource: ResourceKind,
        resource_id: i64,
    ) -> Result<Vec<Audit>, DatabaseError> {
        let audits = sqlx::query_as::<_, Audit>(
            "SELECT * FROM audits WHERE resource_kind = ? AND resource_id = ? ORDER BY id",
        )
        .bind(resource as i64)
        .bind(resource_id)
        .fetch_all(self.pool())
        .await?;
        Ok(audits)
    }
}

async fn insert_authority_row(
    conn: &mut SqliteConnection,
    app_id: i64,
    grant: &NewAuthority<'_>,
    now: i64,
) -> Result<i64, DatabaseError> {
    let id = sqlx::query(
        "INSERT INTO authorities (app_id, permission_id, email, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(app_id)
    .bind(grant.permission_id)
    .bind(grant.email)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub(super) async fn insert_audit(
    conn: &mut SqliteConnection,
    user_id: Option<i64>,
    resource: ResourceKind,
    resource_id: i64,
    action: ActionKind,
) -> Result<(), DatabaseError> {
    let now = unix_timestamp();
    sqlx::query(
        "INSERT INTO audits \
         (user_id, resource_kind, resource_id, action_kind, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(resource as i64)
    .bind(resource_id)
    .bind(action as i64)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}
