use axum::extract::State;
use axum::response::Response;
use axum::{Form, Json};
use serde::{Deserialize, Serialize};

use super::{BundleView, install_link};
use crate::bundles::BundleService;
use crate::error::{ServerResult, found};
use crate::gate::AuthorizedBundle;
use crate::state::AppState;
use crate::urls::{self, Origin};

#[derive(Debug, Deserialize)]
pub struct BundleForm {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Serialize)]
pub struct BundlePage {
    id: i64,
    app_id: i64,
    app_title: String,
    description: String,
    #[serde(flatten)]
    view: BundleView,
    /// Signed, valid for the link lifetime.
    download_url: String,
}

/// `GET /bundle/{id}`
pub async fn show(
    State(state): State<AppState>,
    AuthorizedBundle { app, bundle, .. }: AuthorizedBundle,
    origin: Origin,
) -> ServerResult<Json<BundlePage>> {
    let download_url = install_link(&state.signer, &origin, &bundle)?;
    Ok(Json(BundlePage {
        id: bundle.id,
        app_id: app.id,
        app_title: app.title,
        description: bundle.description.clone(),
        view: BundleView::new(&bundle, &origin),
        download_url,
    }))
}

/// `GET /bundle/{id}/install`: hand the device a fresh signed link.
pub async fn install(
    State(state): State<AppState>,
    AuthorizedBundle { bundle, .. }: AuthorizedBundle,
    origin: Origin,
) -> ServerResult<Response> {
    Ok(found(&install_link(&state.signer, &origin, &bundle)?))
}

/// `POST /bundle/{id}/update`
pub async fn update(
    State(state): State<AppState>,
    AuthorizedBundle { bundle, .. }: AuthorizedBundle,
    Form(form): Form<BundleForm>,
) -> ServerResult<Response> {
    let bundle = BundleService::from_state(&state)
        .update_description(&bundle, &form.description)
        .await?;
    Ok(found(&urls::bundle_path(bundle.id)))
}

/// `POST /bundle/{id}/delete`
pub async fn delete(
    State(state): State<AppState>,
    AuthorizedBundle { login, app, bundle }: AuthorizedBundle,
) -> ServerResult<Response> {
    BundleService::from_state(&state)
        .delete(&bundle, Some(login.user.id))
        .await?;
    Ok(found(&format!("/app/{}", app.id)))
}
