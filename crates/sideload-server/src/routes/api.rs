//! CI API, authenticated by per-app token instead of a session.

use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde::{Deserialize, Serialize};

use super::{BundleView, read_upload_form};
use crate::bundles::BundleService;
use crate::error::{Envelope, ServerError, ServerResult};
use crate::gate::ApiApp;
use crate::state::AppState;
use crate::urls::Origin;

#[derive(Debug, Serialize)]
pub struct BundleListContent {
    total_count: i64,
    page: u32,
    limit: u32,
    bundles: Vec<BundleView>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    token: Option<String>,
    page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    token: Option<String>,
    file_id: Option<String>,
}

/// `POST /api/bundle/upload` (multipart: token, file, description, optional bundle_version)
pub async fn upload(
    State(state): State<AppState>,
    origin: Origin,
    multipart: Multipart,
) -> ServerResult<Response> {
    let form = read_upload_form(multipart).await?;
    let ApiApp(app) = ApiApp::resolve(&state, form.token.as_deref()).await?;

    let bundle = BundleService::from_state(&state)
        .upload(&app, form.upload, None)
        .await?;
    Ok(Envelope::ok("Bundle is created!", BundleView::new(&bundle, &origin)).into_response())
}

/// `GET /api/bundle/list?token=&page=`
pub async fn list(
    State(state): State<AppState>,
    origin: Origin,
    Query(query): Query<ListQuery>,
) -> ServerResult<Response> {
    let ApiApp(app) = ApiApp::resolve(&state, query.token.as_deref()).await?;
    let page = BundleService::from_state(&state)
        .page(&app, query.page.unwrap_or(1), state.settings.page_size)
        .await?;

    let content = BundleListContent {
        total_count: page.total_count,
        page: page.page,
        limit: page.limit,
        bundles: page
            .bundles
            .iter()
            .map(|b| BundleView::new(b, &origin))
            .collect(),
    };
    Ok(Envelope::ok("Bundle List", content).into_response())
}

/// `POST /api/bundle/delete` (form: token, file_id)
pub async fn delete(
    State(state): State<AppState>,
    Form(form): Form<DeleteForm>,
) -> ServerResult<Response> {
    let ApiApp(app) = ApiApp::resolve(&state, form.token.as_deref()).await?;
    let file_id = form
        .file_id
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ServerError::validation("file_id is required."))?;

    let bundle = match state.db.get_bundle_by_file_id(app.id, &file_id).await {
        Ok(bundle) => bundle,
        Err(e) if e.is_not_found() => {
            return Ok(
                Envelope::message(StatusCode::NOT_FOUND, vec!["Bundle not found.".into()])
                    .into_response(),
            );
        }
        Err(e) => return Err(e.into()),
    };

    BundleService::from_state(&state)
        .delete(&bundle, None)
        .await?;
    Ok(Envelope::message(StatusCode::OK, vec!["Bundle is deleted!".into()]).into_response())
}
