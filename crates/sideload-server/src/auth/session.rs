//! Process-held browser sessions.
//!
//! The browser only ever sees an opaque session id inside an encrypted
//! private cookie; everything else lives in [`SessionStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use sideload_core::db::unix_timestamp;
use tracing::debug;

use crate::error::ServerError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "sideload_session";

/// Sessions idle longer than this are dropped.
pub const SESSION_IDLE_SECS: i64 = 14 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    pub login_user_id: Option<i64>,
    /// Serialized [`OAuthToken`](super::identity::OAuthToken).
    pub oauth_token: Option<String>,
    /// Anti-CSRF key while a login round trip is in flight.
    pub oauth_state_key: Option<String>,
    pub touched_at: i64,
}

impl SessionData {
    pub const fn is_logged_in(&self) -> bool {
        self.login_user_id.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, SessionData>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an empty session and return its id.
    pub fn create(&self) -> String {
        let now = unix_timestamp();
        let id = new_session_id();
        let mut sessions = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, s| now - s.touched_at < SESSION_IDLE_SECS);
        sessions.insert(
            id.clone(),
            SessionData {
                touched_at: now,
                ..SessionData::default()
            },
        );
        id
    }

    /// Mark a session as used. `false` when it does not exist (or idled out).
    pub fn touch(&self, id: &str) -> bool {
        let now = unix_timestamp();
        let mut sessions = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(id) {
            Some(s) if now - s.touched_at < SESSION_IDLE_SECS => {
                s.touched_at = now;
                true
            }
            Some(_) => {
                sessions.remove(id);
                false
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<SessionData> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Apply `f` to the session, recreating it if it vanished meanwhile.
    pub fn update<F: FnOnce(&mut SessionData)>(&self, id: &str, f: F) {
        let mut sessions = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let data = sessions.entry(id.to_string()).or_insert_with(|| SessionData {
            touched_at: unix_timestamp(),
            ..SessionData::default()
        });
        f(data);
    }

    /// Move the session stored under `old` to a new id and return it.
    /// The old id stops resolving.
    pub fn rotate(&self, old: &str) -> String {
        let id = new_session_id();
        let mut sessions = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut data = sessions.remove(old).unwrap_or_default();
        data.touched_at = unix_timestamp();
        sessions.insert(id.clone(), data);
        id
    }

    pub fn remove(&self, id: &str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle on the current request's session.
///
/// Clones share the id, so the session layer sees a rotation made by a
/// handler.
#[derive(Debug, Clone)]
pub struct Session {
    id: Arc<RwLock<String>>,
    rotated: Arc<AtomicBool>,
    store: SessionStore,
}

impl Session {
    pub fn new(id: String, store: SessionStore) -> Self {
        Self {
            id: Arc::new(RwLock::new(id)),
            rotated: Arc::new(AtomicBool::new(false)),
            store,
        }
    }

    pub fn id(&self) -> String {
        self.id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether the id changed while handling this request.
    pub fn was_rotated(&self) -> bool {
        self.rotated.load(Ordering::Acquire)
    }

    pub fn data(&self) -> SessionData {
        self.store.get(&self.id()).unwrap_or_default()
    }

    pub fn set_state_key(&self, key: String) {
        self.store.update(&self.id(), |s| s.oauth_state_key = Some(key));
    }

    /// Remove and return the pending anti-CSRF key.
    pub fn take_state_key(&self) -> Option<String> {
        let mut key = None;
        self.store.update(&self.id(), |s| key = s.oauth_state_key.take());
        key
    }

    /// Log in under a new session id. A cookie planted before the login
    /// keeps pointing at nothing.
    pub fn login(&self, user_id: i64, token: String) {
        let id = {
            let mut current = self.id.write().unwrap_or_else(PoisonError::into_inner);
            let fresh = self.store.rotate(current.as_str());
            current.clone_from(&fresh);
            fresh
        };
        self.rotated.store(true, Ordering::Release);
        self.store.update(&id, |s| {
            s.login_user_id = Some(user_id);
            s.oauth_token = Some(token);
        });
    }

    pub fn set_token(&self, token: String) {
        self.store.update(&self.id(), |s| s.oauth_token = Some(token));
    }

    pub fn logout(&self) {
        self.store.update(&self.id(), |s| {
            s.login_user_id = None;
            s.oauth_token = None;
        });
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| ServerError::Internal("session layer is not installed".into()))
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn session_cookie(id: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(SESSION_IDLE_SECS))
        .build()
}

/// Load the caller's session (or start one) and make it available to
/// handlers through the [`Session`] extractor.
pub async fn session_layer(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let existing = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|id| state.sessions.touch(id));

    let (id, fresh) = match existing {
        Some(id) => (id, false),
        None => (state.sessions.create(), true),
    };
    if fresh {
        debug!("New session started");
    }

    let session = Session::new(id, state.sessions.clone());
    req.extensions_mut().insert(session.clone());
    let response = next.run(req).await;

    if fresh || session.was_rotated() {
        let jar = jar.add(session_cookie(&session.id(), state.settings.secure_cookies));
        (jar, response).into_response()
    } else {
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_update() {
        let store = SessionStore::new();
        let id = store.create();
        assert!(store.touch(&id));

        let session = Session::new(id.clone(), store.clone());
        assert!(!session.data().is_logged_in());

        session.set_state_key("k1".into());
        assert_eq!(session.data().oauth_state_key.as_deref(), Some("k1"));
        assert_eq!(session.take_state_key().as_deref(), Some("k1"));
        assert_eq!(session.take_state_key(), None);

        session.login(7, "{}".into());
        let id = session.id();
        assert_eq!(store.get(&id).unwrap().login_user_id, Some(7));

        session.logout();
        let data = store.get(&id).unwrap();
        assert_eq!(data.login_user_id, None);
        assert_eq!(data.oauth_token, None);
    }

    #[test]
    fn unknown_session_is_not_touched() {
        let store = SessionStore::new();
        assert!(!store.touch("nope"));
        assert!(store.is_empty());
    }

    #[test]
    fn idle_sessions_expire() {
        let store = SessionStore::new();
        let id = store.create();
        store.update(&id, |s| s.touched_at -= SESSION_IDLE_SECS);

        assert!(!store.touch(&id));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn create_prunes_idle_sessions() {
        let store = SessionStore::new();
        let old = store.create();
        store.update(&old, |s| s.touched_at = 0);

        let _ = store.create();
        assert_eq!(store.len(), 1);
        assert!(store.get(&old).is_none());
    }

    #[test]
    fn login_moves_the_session_to_a_new_id() {
        let store = SessionStore::new();
        let before = store.create();
        let session = Session::new(before.clone(), store.clone());
        session.set_state_key("k1".into());
        assert!(!session.was_rotated());

        session.login(7, "{}".into());
        let after = session.id();
        assert_ne!(before, after);
        assert!(session.was_rotated());
        assert!(store.get(&before).is_none());
        assert!(!store.touch(&before));

        let data = store.get(&after).unwrap();
        assert_eq!(data.login_user_id, Some(7));
        assert_eq!(data.oauth_state_key.as_deref(), Some("k1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_drops_session() {
        let store = SessionStore::new();
        let id = store.create();
        store.remove(&id);
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn cookie_flags() {
        let cookie = session_cookie("abc", true);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
    }
}
