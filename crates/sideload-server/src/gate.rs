//! Access gate.
//!
//! Each protected handler names the stage it needs as an extractor; the
//! stages build on each other in a fixed order:
//!
//! 1. [`LoggedIn`]: an anonymous session is redirected to `/login`.
//! 2. [`AuthorizedApp`] / [`AuthorizedBundle`]: the `{id}` route parameter
//!    must resolve to a row (else 404), and the user's own token must be
//!    able to see the backing storage object (else 403).
//!
//! Download routes use [`SignedBundle`] instead, which needs no session.

use std::collections::HashMap;

use axum::extract::{FromRequestParts, MatchedPath, Path, Query};
use axum::http::request::Parts;
use sideload_crypto::{LinkBinding, LinkParams, SignedRequest};
use tracing::{debug, warn};

use crate::auth::flow::resolve_login;
use crate::auth::{LoginContext, Session};
use crate::error::ServerError;
use crate::state::AppState;
use crate::storage::{App, Bundle, DatabaseError};
use crate::urls::Origin;

/// Numeric `{name}` route parameter; anything else is "not found".
async fn route_id(parts: &mut Parts, state: &AppState, name: &str) -> Result<i64, ServerError> {
    let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
        .await
        .map_err(|_| ServerError::NotFound)?;
    params
        .get(name)
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or(ServerError::NotFound)
}

fn not_found_as_404(e: DatabaseError) -> ServerError {
    if e.is_not_found() {
        ServerError::NotFound
    } else {
        e.into()
    }
}

/// Whether the logged-in user's own token can see `file_id`.
async fn check_visible(
    state: &AppState,
    login: &LoginContext,
    file_id: &str,
) -> Result<(), ServerError> {
    match state.user_drive.can_view(&login.access_token, file_id).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            debug!(user_id = login.user.id, file_id, "Not shared with user");
            Err(ServerError::Forbidden)
        }
        Err(e) => {
            warn!(user_id = login.user.id, file_id, error = %e, "Visibility check failed");
            Err(ServerError::Forbidden)
        }
    }
}

/// Login if there is one; never rejects an anonymous visitor.
#[derive(Debug, Clone)]
pub struct MaybeLoggedIn(pub Option<LoginContext>);

impl FromRequestParts<AppState> for MaybeLoggedIn {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        Ok(Self(resolve_login(state, &session).await?))
    }
}

#[derive(Debug, Clone)]
pub struct LoggedIn(pub LoginContext);

impl FromRequestParts<AppState> for LoggedIn {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let MaybeLoggedIn(login) = MaybeLoggedIn::from_request_parts(parts, state).await?;
        login.map(Self).ok_or_else(|| ServerError::LoginRequired {
            next: parts.uri.path().to_string(),
        })
    }
}

/// A logged-in user and an app they can see, from `{id}`.
#[derive(Debug, Clone)]
pub struct AuthorizedApp {
    pub login: LoginContext,
    pub app: App,
}

impl FromRequestParts<AppState> for AuthorizedApp {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let LoggedIn(login) = LoggedIn::from_request_parts(parts, state).await?;
        let id = route_id(parts, state, "id").await?;
        let app = state.db.get_app(id).await.map_err(not_found_as_404)?;
        check_visible(state, &login, &app.file_id).await?;
        Ok(Self { login, app })
    }
}

/// A logged-in user and a bundle they can see, from `{id}`.
#[derive(Debug, Clone)]
pub struct AuthorizedBundle {
    pub login: LoginContext,
    pub app: App,
    pub bundle: Bundle,
}

impl FromRequestParts<AppState> for AuthorizedBundle {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let LoggedIn(login) = LoggedIn::from_request_parts(parts, state).await?;
        let id = route_id(parts, state, "id").await?;
        let bundle = state.db.get_bundle(id).await.map_err(not_found_as_404)?;
        check_visible(state, &login, &bundle.file_id).await?;
        let app = state.db.get_app(bundle.app_id).await?;
        Ok(Self { login, app, bundle })
    }
}

/// A bundle reached through a valid signed link.
#[derive(Debug, Clone)]
pub struct SignedBundle {
    pub app: App,
    pub bundle: Bundle,
    pub origin: Origin,
}

impl FromRequestParts<AppState> for SignedBundle {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let id = route_id(parts, state, "id").await?;
        let origin = Origin::from_parts(parts).ok_or(ServerError::Forbidden)?;
        let Query(params) = Query::<LinkParams>::from_request_parts(parts, state)
            .await
            .map_err(|_| ServerError::Forbidden)?;

        // The link must have been issued for exactly this route and bundle.
        let template = parts
            .extensions
            .get::<MatchedPath>()
            .map(|m| m.as_str().replace("{id}", &id.to_string()))
            .ok_or(ServerError::Forbidden)?;
        let expected = LinkBinding::get(&origin.host, &template);
        let actual = LinkBinding::new(parts.method.as_str(), &origin.host, parts.uri.path());

        let request = SignedRequest {
            params: &params,
            expected: &expected,
            actual: &actual,
        };
        match state.signer.verify_request(&request) {
            Ok(true) => {}
            Ok(false) => {
                debug!(bundle_id = id, "Signed link rejected");
                return Err(ServerError::Forbidden);
            }
            Err(e) => {
                debug!(bundle_id = id, error = %e, "Malformed signed link");
                return Err(ServerError::Forbidden);
            }
        }

        let bundle = state.db.get_bundle(id).await.map_err(not_found_as_404)?;
        let app = state.db.get_app(bundle.app_id).await?;
        Ok(Self {
            app,
            bundle,
            origin,
        })
    }
}

/// App resolved from an API token carried in the query string or form.
#[derive(Debug, Clone)]
pub struct ApiApp(pub App);

impl ApiApp {
    pub async fn resolve(state: &AppState, token: Option<&str>) -> Result<Self, ServerError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(ServerError::InvalidApiToken)?;
        match state.db.get_app_by_api_token(token).await {
            Ok(app) => Ok(Self(app)),
            Err(e) if e.is_not_found() => Err(ServerError::InvalidApiToken),
            Err(e) => Err(e.into()),
        }
    }
}
