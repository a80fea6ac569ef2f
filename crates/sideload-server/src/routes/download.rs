//! Signed-link downloads; these run without a session.

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::error::{ServerError, ServerResult};
use crate::gate::SignedBundle;
use crate::manifest::{self, Manifest};
use crate::state::AppState;
use crate::storage::{ActionKind, Platform, ResourceKind};
use crate::urls;

fn attachment(file_name: &str) -> HeaderValue {
    let safe: String = file_name
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// `GET /bundle/{id}/download_plist`
pub async fn plist(
    State(state): State<AppState>,
    SignedBundle {
        app,
        bundle,
        origin,
    }: SignedBundle,
) -> ServerResult<Response> {
    if bundle.platform() != Some(Platform::Ios) {
        return Err(ServerError::NotFound);
    }
    let package_url = origin.signed_url(&state.signer, &urls::download_path(bundle.id))?;
    let body = Manifest::new(&app.title, &bundle.bundle_version, &package_url)
        .to_xml()
        .map_err(|e| ServerError::Internal(format!("manifest: {e}")))?;

    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static(manifest::CONTENT_TYPE)),
            (CONTENT_DISPOSITION, attachment(manifest::FILE_NAME)),
        ],
        body,
    )
        .into_response())
}

/// `GET /bundle/{id}/download`
pub async fn binary(
    State(state): State<AppState>,
    SignedBundle { bundle, .. }: SignedBundle,
) -> ServerResult<Response> {
    let platform = bundle
        .platform()
        .ok_or_else(|| ServerError::Internal(format!("bundle {} has no platform", bundle.id)))?;
    let content = state.storage.download(&bundle.file_id).await?;

    // Signed downloads carry no session, hence no user.
    if let Err(e) = state
        .db
        .record_audit(None, ResourceKind::Bundle, bundle.id, ActionKind::Download)
        .await
    {
        warn!(bundle_id = bundle.id, error = %e, "Failed to record download");
        return Err(e.into());
    }
    info!(bundle_id = bundle.id, "Bundle download started");

    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static(platform.content_type())),
            (CONTENT_DISPOSITION, attachment(&content.name)),
        ],
        Body::from_stream(content.body),
    )
        .into_response())
}
