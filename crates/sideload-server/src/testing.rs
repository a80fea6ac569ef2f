//! Shared fixtures: an in-memory database wired to the fake providers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::sync::Arc;

use axum_extra::extract::cookie::Key;
use sideload_core::Settings;
use sideload_crypto::test_signer;

use crate::apps::AppService;
use crate::auth::fake::FakeIdentity;
use crate::auth::{Session, SessionStore};
use crate::authority::AuthorityManager;
use crate::bundles::{BundleService, BundleUpload, UploadedFile};
use crate::drive::memory::MemoryDrive;
use crate::package::fixture;
use crate::state::AppState;
use crate::storage::{App, Authority, Bundle, ServerDatabase, User};

pub struct TestEnv {
    pub state: AppState,
    pub drive: Arc<MemoryDrive>,
    pub identity: Arc<FakeIdentity>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let drive = Arc::new(MemoryDrive::new());
        let identity = Arc::new(FakeIdentity::new());
        let state = AppState {
            db: ServerDatabase::open_in_memory().await.unwrap(),
            settings: Arc::new(
                Settings::default()
                    .with_permitted_domains("example.com")
                    .with_organization_name("Acme"),
            ),
            signer: Arc::new(test_signer()),
            sessions: SessionStore::new(),
            identity: identity.clone(),
            storage: drive.clone(),
            user_drive: drive.clone(),
            cookie_key: Key::generate(),
        };
        Self {
            state,
            drive,
            identity,
        }
    }

    /// A fresh anonymous session.
    pub fn session(&self) -> Session {
        let id = self.state.sessions.create();
        Session::new(id, self.state.sessions.clone())
    }

    pub async fn user(&self, email: &str) -> User {
        self.state.db.find_or_create_user(email).await.unwrap()
    }

    pub async fn create_app(&self, owner_email: &str, title: &str) -> App {
        self.app_with_owner(owner_email, title).await.0
    }

    pub async fn app_with_owner(&self, owner_email: &str, title: &str) -> (App, User) {
        let owner = self.user(owner_email).await;
        let app = AppService::from_state(&self.state)
            .create(&owner, title, "")
            .await
            .unwrap();
        (app, owner)
    }

    pub async fn grant(&self, app: &App, actor_email: &str, email: &str) -> Authority {
        let actor = self.user(actor_email).await;
        AuthorityManager::from_state(&self.state)
            .grant(app, email, &actor)
            .await
            .unwrap()
    }

    /// Upload a package for the platform `file_name` implies, declaring
    /// `version` inside it.
    pub async fn upload(&self, app: &App, file_name: &str, version: &str) -> Bundle {
        let upload = BundleUpload {
            file: Some(spooled(file_name, &package_bytes(file_name, version))),
            bundle_version: None,
            description: String::new(),
        };
        BundleService::from_state(&self.state)
            .upload(app, upload, None)
            .await
            .unwrap()
    }
}

/// Package contents matching `file_name`'s extension.
pub fn package_bytes(file_name: &str, version: &str) -> Vec<u8> {
    if file_name.ends_with(".ipa") {
        fixture::ipa(version)
    } else {
        fixture::apk(version)
    }
}

/// `bytes` written to a temporary file, as the upload form would.
pub fn spooled(file_name: &str, bytes: &[u8]) -> UploadedFile {
    let mut temp = tempfile::NamedTempFile::new().unwrap();
    temp.write_all(bytes).unwrap();
    UploadedFile {
        file_name: file_name.into(),
        size: bytes.len() as u64,
        temp,
    }
}

/// A session already logged in as `email` with a live provider token.
pub async fn logged_in(env: &TestEnv, email: &str) -> Session {
    let user = env.user(email).await;
    let session = env.session();
    let token = FakeIdentity::token_for(email).to_session_string().unwrap();
    session.login(user.id, token);
    session
}
