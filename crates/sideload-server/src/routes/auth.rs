use axum::Json;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::apps::AppService;
use crate::auth::flow::{begin_login, complete_login};
use crate::auth::{CallbackQuery, Session};
use crate::error::{ServerResult, found};
use crate::gate::MaybeLoggedIn;
use crate::state::AppState;
use crate::storage::App;

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndexPage {
    organization_name: String,
    logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    apps: Vec<App>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `GET /`: the apps shared with the visitor, or an empty list.
pub async fn index(
    State(state): State<AppState>,
    MaybeLoggedIn(login): MaybeLoggedIn,
    Query(query): Query<IndexQuery>,
) -> ServerResult<Json<IndexPage>> {
    let apps = match &login {
        Some(login) => AppService::from_state(&state).list_for(&login.user).await?,
        None => Vec::new(),
    };
    Ok(Json(IndexPage {
        organization_name: state.settings.organization_name.clone(),
        logged_in: login.is_some(),
        email: login.map(|l| l.user.email),
        apps,
        error: query.error,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    next: Option<String>,
}

/// `GET /login`
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<LoginQuery>,
) -> ServerResult<Response> {
    let target = begin_login(&state, &session, query.next.as_deref()).await?;
    Ok(found(&target))
}

/// `GET /logout`
pub async fn logout(session: Session) -> Response {
    session.logout();
    found("/")
}

/// `GET /oauth2callback`
pub async fn callback(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<CallbackQuery>,
) -> ServerResult<Response> {
    let target = complete_login(&state, &session, &query).await?;
    Ok(found(&target))
}
