//! HTTP surface.

mod api;
mod app;
mod auth;
mod bundle;
mod download;


use axum::Router;
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use serde::Serialize;
use sideload_crypto::LinkSigner;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::auth::session_layer;
use crate::bundles::{BundleUpload, UploadedFile};
use crate::error::ServerError;
use crate::state::AppState;
use crate::storage::{Bundle, Platform};
use crate::urls::{self, Origin};

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Build the full router: browser pages behind the session layer, signed
/// downloads and the CI API without it.
pub fn build_router(state: AppState) -> Router {
    let pages = Router::new()
        .route("/", get(auth::index))
        .route("/login", get(auth::login))
        .route("/logout", get(auth::logout))
        .route("/oauth2callback", get(auth::callback))
        .route("/app/new", get(app::new_form))
        .route("/app", post(app::create))
        .route("/app/{id}", get(app::show))
        .route("/app/{id}/update", post(app::update))
        .route("/app/{id}/refresh_token", post(app::refresh_token))
        .route("/app/{id}/delete", post(app::delete))
        .route("/app/{id}/authority", post(app::grant))
        .route(
            "/app/{id}/authority/{authority_id}/delete",
            post(app::revoke),
        )
        .route("/app/{id}/bundle", post(app::upload_bundle))
        .route("/bundle/{id}", get(bundle::show))
        .route("/bundle/{id}/update", post(bundle::update))
        .route("/bundle/{id}/delete", post(bundle::delete))
        .route("/bundle/{id}/install", get(bundle::install))
        .layer(from_fn_with_state(state.clone(), session_layer));

    let public = Router::new()
        .route("/bundle/{id}/download_plist", get(download::plist))
        .route("/bundle/{id}/download", get(download::binary))
        .route("/api/bundle/upload", post(api::upload))
        .route("/api/bundle/list", get(api::list))
        .route("/api/bundle/delete", post(api::delete));

    Router::new()
        .merge(pages)
        .merge(public)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub(crate) fn rfc3339(unix: i64) -> String {
    OffsetDateTime::from_unix_timestamp(unix)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default()
}

const fn platform_name(platform: Option<Platform>) -> &'static str {
    match platform {
        Some(Platform::Android) => "android",
        Some(Platform::Ios) => "ios",
        None => "unknown",
    }
}

/// Bundle as shown to API clients.
#[derive(Debug, Serialize)]
pub struct BundleView {
    pub file_id: String,
    pub version: String,
    pub revision: i64,
    /// Session-protected page that hands out a fresh install link.
    pub install_url: String,
    pub qr_code_url: String,
    pub platform_type: &'static str,
    pub created_at: String,
    pub updated_at: String,
}

impl BundleView {
    pub fn new(bundle: &Bundle, origin: &Origin) -> Self {
        Self {
            file_id: bundle.file_id.clone(),
            version: bundle.bundle_version.clone(),
            revision: bundle.revision,
            install_url: origin.url(&urls::install_path(bundle.id)),
            qr_code_url: origin.url(&urls::bundle_path(bundle.id)),
            platform_type: platform_name(bundle.platform()),
            created_at: rfc3339(bundle.created_at),
            updated_at: rfc3339(bundle.updated_at),
        }
    }
}

/// The link a device follows to install `bundle`: the signed binary for
/// Android, an `itms-services` manifest link for iOS.
pub fn install_link(
    signer: &LinkSigner,
    origin: &Origin,
    bundle: &Bundle,
) -> Result<String, ServerError> {
    match bundle.platform() {
        Some(Platform::Ios) => {
            let manifest = origin.signed_url(signer, &urls::plist_path(bundle.id))?;
            Ok(urls::itms_services_url(&manifest))
        }
        Some(Platform::Android) => Ok(origin.signed_url(signer, &urls::download_path(bundle.id))?),
        None => Err(ServerError::Internal(format!(
            "bundle {} has unknown platform {}",
            bundle.id, bundle.platform_type
        ))),
    }
}

/// Multipart bundle upload, plus the API token when the form carries one.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub upload: BundleUpload,
    pub token: Option<String>,
}

fn multipart_error(e: &axum::extract::multipart::MultipartError) -> ServerError {
    ServerError::BadRequest(e.body_text())
}

/// Copy the `file` field to a temporary file chunk by chunk.
async fn spool(mut field: Field<'_>) -> Result<UploadedFile, ServerError> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let temp = tempfile::NamedTempFile::new()
        .map_err(|e| ServerError::Internal(format!("temporary file: {e}")))?;
    let handle = temp
        .reopen()
        .map_err(|e| ServerError::Internal(format!("temporary file: {e}")))?;
    let mut out = tokio::fs::File::from_std(handle);

    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(&e))? {
        out.write_all(&chunk)
            .await
            .map_err(|e| ServerError::Internal(format!("temporary file: {e}")))?;
        size += chunk.len() as u64;
    }
    out.flush()
        .await
        .map_err(|e| ServerError::Internal(format!("temporary file: {e}")))?;

    debug!(file_name, size, "Upload spooled");
    Ok(UploadedFile {
        file_name,
        size,
        temp,
    })
}

pub async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ServerError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => form.upload.file = Some(spool(field).await?),
            "bundle_version" | "description" | "token" => {
                let text = field.text().await.map_err(|e| multipart_error(&e))?;
                match name.as_str() {
                    "bundle_version" => form.upload.bundle_version = Some(text),
                    "description" => form.upload.description = text,
                    _ => form.token = Some(text),
                }
            }
            _ => {}
        }
    }
    Ok(form)
}
