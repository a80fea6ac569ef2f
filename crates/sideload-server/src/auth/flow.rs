//! Login state machine: anonymous, awaiting callback, logged in.
//!
//! The anti-CSRF key stored in the session before redirecting to the
//! provider must come back verbatim in `state`; anything else aborts the
//! callback before the code is exchanged.

use serde::Deserialize;
use sideload_core::db::unix_timestamp;
use sideload_crypto::{constant_time_str_eq, generate_state_key};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::identity::{IdentityError, OAuthToken};
use super::session::Session;
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;
use crate::storage::User;

const STATE_SESSION_KEY: &str = "session_key";
const STATE_NEXT: &str = "next";

pub const LANDING_PATH: &str = "/";
pub const UNPERMITTED_EMAIL: &str = "This email is not permitted to log in.";

/// The logged-in user together with a live access token.
#[derive(Debug, Clone)]
pub struct LoginContext {
    pub user: User,
    pub access_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
}

/// Pack the session key and the post-login destination into `state`.
pub fn encode_state(session_key: &str, next: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair(STATE_SESSION_KEY, session_key)
        .append_pair(STATE_NEXT, next)
        .finish()
}

/// Split a returned `state` into `(session_key, next)`.
pub fn parse_state(raw: &str) -> (Option<String>, Option<String>) {
    let mut session_key = None;
    let mut next = None;
    for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
        match k.as_ref() {
            STATE_SESSION_KEY => session_key = Some(v.into_owned()),
            STATE_NEXT => next = Some(v.into_owned()),
            _ => {}
        }
    }
    (session_key, next)
}

/// Reduce a requested destination to a local path.
///
/// Only the path survives, so a crafted `next` can never send the browser
/// to another host. Missing or unparsable input lands on `/`.
pub fn extract_next(raw: Option<&str>) -> String {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return LANDING_PATH.to_string();
    };
    Url::parse("http://localhost/")
        .and_then(|base| base.join(raw))
        .map_or_else(|_| LANDING_PATH.to_string(), |u| u.path().to_string())
}

/// Login is allowed when the email already holds an authority on some app,
/// or its domain is one of the configured permitted domains.
pub async fn is_permitted_email(state: &AppState, email: &str) -> ServerResult<bool> {
    if state.db.has_any_authority(email).await? {
        return Ok(true);
    }
    Ok(state.settings.is_permitted_domain(email))
}

/// Provider answers that mean "log in again" rather than "something broke".
const fn is_stale(err: &IdentityError) -> bool {
    err.is_client_error() || matches!(err, IdentityError::InvalidResponse(_))
}

/// Resolve the session's login, degrading to anonymous whenever the stored
/// token turns out to be unusable.
#[instrument(skip_all)]
pub async fn resolve_login(
    state: &AppState,
    session: &Session,
) -> ServerResult<Option<LoginContext>> {
    let data = session.data();
    let Some(user_id) = data.login_user_id else {
        return Ok(None);
    };
    let Some(mut token) = data
        .oauth_token
        .as_deref()
        .and_then(OAuthToken::from_session_string)
    else {
        warn!(user_id, "Stored token is unreadable, logging out");
        session.logout();
        return Ok(None);
    };

    if token.is_expired_at(unix_timestamp()) && token.refresh_token.is_some() {
        match state.identity.refresh(&token).await {
            Ok(fresh) => {
                let raw = fresh
                    .to_session_string()
                    .map_err(|e| ServerError::Internal(e.to_string()))?;
                session.set_token(raw);
                debug!(user_id, "Access token refreshed");
                token = fresh;
            }
            Err(e) if is_stale(&e) => {
                info!(user_id, error = %e, "Refresh rejected, logging out");
                session.logout();
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let info = match state.identity.token_info(&token.access_token).await {
        Ok(info) => info,
        Err(e) if is_stale(&e) => {
            info!(user_id, error = %e, "Token rejected, logging out");
            session.logout();
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let user = match state.db.get_user(user_id).await {
        Ok(user) => user,
        Err(e) if e.is_not_found() => {
            session.logout();
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    if !user.email.eq_ignore_ascii_case(&info.email) {
        warn!(user_id, "Token belongs to another account, logging out");
        session.logout();
        return Ok(None);
    }

    Ok(Some(LoginContext {
        user,
        access_token: token.access_token,
    }))
}

/// Start a login round trip and return where to send the browser.
pub async fn begin_login(
    state: &AppState,
    session: &Session,
    next: Option<&str>,
) -> ServerResult<String> {
    let next = extract_next(next);
    if resolve_login(state, session).await?.is_some() {
        return Ok(next);
    }

    let key = generate_state_key();
    let url = state.identity.authorization_url(&encode_state(&key, &next));
    session.set_state_key(key);
    Ok(url)
}

/// Handle the provider's callback and return where to send the browser.
#[instrument(skip_all)]
pub async fn complete_login(
    state: &AppState,
    session: &Session,
    query: &CallbackQuery,
) -> ServerResult<String> {
    let (returned_key, next) = query.state.as_deref().map(parse_state).unwrap_or_default();
    let expected = session.take_state_key();

    let matches = match (returned_key.as_deref(), expected.as_deref()) {
        (Some(returned), Some(expected)) => constant_time_str_eq(returned, expected),
        _ => false,
    };
    if !matches {
        warn!("OAuth state mismatch on callback");
        return Err(ServerError::BadRequest("OAuth state does not match".into()));
    }
    let next = extract_next(next.as_deref());

    if let Some(error) = query.error.as_deref() {
        info!(error, "Consent was not granted");
        return Ok(error_landing(error));
    }
    let code = query
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ServerError::BadRequest("code is required".into()))?;

    let token = state.identity.exchange_code(code).await?;
    let info = state.identity.token_info(&token.access_token).await?;

    if !is_permitted_email(state, &info.email).await? {
        info!(email = %info.email, "Login refused for unpermitted email");
        return Ok(error_landing(UNPERMITTED_EMAIL));
    }

    let user = state.db.find_or_create_user(&info.email).await?;
    let raw = token
        .to_session_string()
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    session.login(user.id, raw);

    info!(user_id = user.id, "User logged in");
    Ok(next)
}

fn error_landing(message: &str) -> String {
    format!("{LANDING_PATH}?error={}", urlencoding::encode(message))
}
