use axum::extract::{Multipart, Path, Query, State};
use axum::response::{Html, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{BundleView, read_upload_form};
use crate::apps::AppService;
use crate::authority::{AuthorityError, AuthorityManager};
use crate::bundles::BundleService;
use crate::drive::Principal;
use crate::error::{ServerResult, found};
use crate::gate::{AuthorizedApp, LoggedIn};
use crate::state::AppState;
use crate::storage::{App, Authority};
use crate::urls::Origin;

const NEW_APP_FORM: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>New app</title></head>
<body>
<form method="post" action="/app">
<label>Title <input name="title" required></label>
<label>Description <textarea name="description"></textarea></label>
<button type="submit">Create</button>
</form>
</body>
</html>
"#;

#[derive(Debug, Deserialize)]
pub struct AppForm {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthorityForm {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct BundleList {
    total_count: i64,
    page: u32,
    limit: u32,
    bundles: Vec<BundleView>,
}

#[derive(Debug, Serialize)]
pub struct AppPage {
    app: App,
    /// Shown to members so they can wire up CI.
    api_token: String,
    authorities: Vec<Authority>,
    /// What the folder is actually shared with; `None` when the provider
    /// could not be asked.
    shared_with: Option<Vec<Principal>>,
    bundles: BundleList,
}

fn app_path(app: &App) -> String {
    format!("/app/{}", app.id)
}

/// `GET /app/new`
pub async fn new_form(_login: LoggedIn) -> Html<&'static str> {
    Html(NEW_APP_FORM)
}

/// `POST /app`
pub async fn create(
    State(state): State<AppState>,
    LoggedIn(login): LoggedIn,
    Form(form): Form<AppForm>,
) -> ServerResult<Response> {
    let app = AppService::from_state(&state)
        .create(&login.user, &form.title, &form.description)
        .await?;
    Ok(found(&app_path(&app)))
}

/// `GET /app/{id}`
pub async fn show(
    State(state): State<AppState>,
    AuthorizedApp { app, .. }: AuthorizedApp,
    origin: Origin,
    Query(query): Query<PageQuery>,
) -> ServerResult<Json<AppPage>> {
    let manager = AuthorityManager::from_state(&state);
    let authorities = manager.list(&app).await?;
    let shared_with = match manager.principals(&app).await {
        Ok(principals) => Some(principals),
        Err(e) => {
            warn!(app_id = app.id, error = %e, "Cannot list folder principals");
            None
        }
    };
    let page = BundleService::from_state(&state)
        .page(&app, query.page.unwrap_or(1), state.settings.page_size)
        .await?;

    Ok(Json(AppPage {
        api_token: app.api_token.clone(),
        authorities,
        shared_with,
        bundles: BundleList {
            total_count: page.total_count,
            page: page.page,
            limit: page.limit,
            bundles: page
                .bundles
                .iter()
                .map(|b| BundleView::new(b, &origin))
                .collect(),
        },
        app,
    }))
}

/// `POST /app/{id}/update`
pub async fn update(
    State(state): State<AppState>,
    AuthorizedApp { app, .. }: AuthorizedApp,
    Form(form): Form<AppForm>,
) -> ServerResult<Response> {
    let app = AppService::from_state(&state)
        .update(&app, &form.title, &form.description)
        .await?;
    Ok(found(&app_path(&app)))
}

/// `POST /app/{id}/refresh_token`
pub async fn refresh_token(
    State(state): State<AppState>,
    AuthorizedApp { app, .. }: AuthorizedApp,
) -> ServerResult<Response> {
    let app = AppService::from_state(&state).refresh_token(&app).await?;
    Ok(found(&app_path(&app)))
}

/// `POST /app/{id}/delete`
pub async fn delete(
    State(state): State<AppState>,
    AuthorizedApp { login, app }: AuthorizedApp,
) -> ServerResult<Response> {
    AppService::from_state(&state)
        .delete(&app, &login.user)
        .await?;
    Ok(found("/"))
}

/// `POST /app/{id}/authority`
pub async fn grant(
    State(state): State<AppState>,
    AuthorizedApp { login, app }: AuthorizedApp,
    Form(form): Form<AuthorityForm>,
) -> ServerResult<Response> {
    AuthorityManager::from_state(&state)
        .grant(&app, &form.email, &login.user)
        .await?;
    Ok(found(&app_path(&app)))
}

/// `POST /app/{id}/authority/{authority_id}/delete`
pub async fn revoke(
    State(state): State<AppState>,
    AuthorizedApp { login, app }: AuthorizedApp,
    Path((_, authority_id)): Path<(String, String)>,
) -> ServerResult<Response> {
    let authority_id = authority_id
        .parse::<i64>()
        .map_err(|_| AuthorityError::InvalidParameter)?;
    AuthorityManager::from_state(&state)
        .revoke(&app, authority_id, &login.user)
        .await?;
    Ok(found(&app_path(&app)))
}

/// `POST /app/{id}/bundle`
pub async fn upload_bundle(
    State(state): State<AppState>,
    AuthorizedApp { login, app }: AuthorizedApp,
    multipart: Multipart,
) -> ServerResult<Response> {
    let form = read_upload_form(multipart).await?;
    let bundle = BundleService::from_state(&state)
        .upload(&app, form.upload, Some(login.user.id))
        .await?;
    Ok(found(&format!("/bundle/{}", bundle.id)))
}
