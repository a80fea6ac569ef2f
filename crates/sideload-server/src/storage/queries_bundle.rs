//! Bundle and revision-counter queries.

use sideload_core::db::unix_timestamp;

use super::db::{DatabaseError, ServerDatabase};
use super::models::{ActionKind, Bundle, BundlePage, Platform, ResourceKind};
use super::queries::insert_audit;

/// Columns for a new bundle row. The revision is assigned on insert.
#[derive(Debug, Clone)]
pub struct NewBundle<'a> {
    pub app_id: i64,
    pub file_id: &'a str,
    pub platform: Platform,
    pub bundle_version: &'a str,
    pub description: &'a str,
}

impl ServerDatabase {
    /// The revision the next upload of `bundle_version` would receive.
    ///
    /// Only a prediction: a concurrent upload may take it first. The
    /// authoritative value comes from [`create_bundle`](Self::create_bundle).
    pub async fn peek_next_revision(
        &self,
        app_id: i64,
        bundle_version: &str,
    ) -> Result<i64, DatabaseError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT max_revision FROM revisions WHERE app_id = ? AND bundle_version = ?",
        )
        .bind(app_id)
        .bind(bundle_version)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map_or(1, |(max,)| max + 1))
    }

    /// Bump the (app, version) revision counter and insert the bundle with
    /// the new revision, plus an audit entry, in one transaction.
    pub async fn create_bundle(
        &self,
        bundle: &NewBundle<'_>,
        user_id: Option<i64>,
    ) -> Result<Bundle, DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        let (revision,): (i64,) = sqlx::query_as(
            "INSERT INTO revisions (app_id, bundle_version, max_revision) VALUES (?, ?, 1) \
             ON CONFLICT(app_id, bundle_version) DO UPDATE SET max_revision = max_revision + 1 \
             RETURNING max_revision",
        )
        .bind(bundle.app_id)
        .bind(bundle.bundle_version)
        .fetch_one(&mut *tx)
        .await?;

        let id = sqlx::query(
            "INSERT INTO bundles (app_id, file_id, platform_type, bundle_version, revision, \
             description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bundle.app_id)
        .bind(bundle.file_id)
        .bind(bundle.platform.code())
        .bind(bundle.bundle_version)
        .bind(revision)
        .bind(bundle.description)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        insert_audit(
            &mut *tx,
            user_id,
            ResourceKind::Bundle,
            id,
            ActionKind::Create,
        )
        .await?;

        tx.commit().await?;
        self.get_bundle(id).await
    }

    pub async fn get_bundle(&self, id: i64) -> Result<Bundle, DatabaseError> {
        sqlx::query_as::<_, Bundle>("SELECT * FROM bundles WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Bundle {id}")))
    }

    pub async fn get_bundle_by_file_id(
        &self,
        app_id: i64,
        file_id: &str,
    ) -> Result<Bundle, DatabaseError> {
        sqlx::query_as::<_, Bundle>("SELECT * FROM bundles WHERE app_id = ? AND file_id = ?")
            .bind(app_id)
            .bind(file_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Bundle with file {file_id}")))
    }

    pub async fn list_all_bundles(&self, app_id: i64) -> Result<Vec<Bundle>, DatabaseError> {
        let bundles =
            sqlx::query_as::<_, Bundle>("SELECT * FROM bundles WHERE app_id = ? ORDER BY id")
                .bind(app_id)
                .fetch_all(self.pool())
                .await?;
        Ok(bundles)
    }

    /// One page of bundles, newest first. `page` is 1-based; 0 is treated as 1.
    pub async fn list_bundles_page(
        &self,
        app_id: i64,
        page: u32,
        limit: u32,
    ) -> Result<BundlePage, DatabaseError> {
        let page = page.max(1);
        let offset = i64::from(page - 1) * i64::from(limit);

        let (total_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM bundles WHERE app_id = ?")
                .bind(app_id)
                .fetch_one(self.pool())
                .await?;

        let bundles = sqlx::query_as::<_, Bundle>(
            "SELECT * FROM bundles WHERE app_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(app_id)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        Ok(BundlePage {
            bundles,
            total_count,
            page,
            limit,
        })
    }

    pub async fn update_bundle_description(
        &self,
        id: i64,
        description: &str,
    ) -> Result<Bundle, DatabaseError> {
        let result = sqlx::query("UPDATE bundles SET description = ?, updated_at = ? WHERE id = ?")
            .bind(description)
            .bind(unix_timestamp())
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Bundle {id}")));
        }
        self.get_bundle(id).await
    }

    /// Delete a bundle row and record the deletion. The revision counter is
    /// left untouched.
    pub async fn delete_bundle(&self, id: i64, user_id: Option<i64>) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query("DELETE FROM bundles WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Bundle {id}")));
        }
        insert_audit(
            &mut *tx,
            user_id,
            ResourceKind::Bundle,
            id,
            ActionKind::Delete,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
