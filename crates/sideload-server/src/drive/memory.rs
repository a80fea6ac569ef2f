//! In-memory storage provider for tests.
//!
//! User tokens are expected in the form produced by
//! [`user_token`]: the fake decides visibility by the email embedded in it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::body::Bytes;

use super::{DriveError, DriveFile, FileContent, Principal, StorageProvider, UserDrive};

const TOKEN_PREFIX: &str = "access-token:";

/// Access token the fake identity provider hands out for `email`.
pub fn user_token(email: &str) -> String {
    format!("{TOKEN_PREFIX}{email}")
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub parent: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct Folder {
    name: String,
    permissions: Vec<Principal>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    folders: HashMap<String, Folder>,
    files: HashMap<String, StoredFile>,
    failing: HashSet<&'static str>,
    calls: Vec<String>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn enter(&mut self, op: &'static str) -> Result<(), DriveError> {
        self.calls.push(op.to_string());
        if self.failing.contains(op) {
            return Err(DriveError::Api {
                status: 500,
                message: format!("{op} failed"),
            });
        }
        Ok(())
    }
}

fn not_found(id: &str) -> DriveError {
    DriveError::Api {
        status: 404,
        message: format!("File not found: {id}"),
    }
}

#[derive(Debug, Default)]
pub struct MemoryDrive {
    state: Mutex<State>,
}

impl MemoryDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call to `op` fail with a 500.
    pub fn fail(&self, op: &'static str) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        self.state.lock().unwrap().failing.remove(op);
    }

    /// How many times `op` has been called.
    pub fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == op)
            .count()
    }

    pub fn folder_exists(&self, id: &str) -> bool {
        self.state.lock().unwrap().folders.contains_key(id)
    }

    pub fn folder_name(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .folders
            .get(id)
            .map(|f| f.name.clone())
    }

    pub fn shared_with(&self, folder_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .folders
            .get(folder_id)
            .map(|f| f.permissions.iter().filter_map(|p| p.email.clone()).collect())
            .unwrap_or_default()
    }

    pub fn file(&self, id: &str) -> Option<StoredFile> {
        self.state.lock().unwrap().files.get(id).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }
}

#[async_trait]
impl StorageProvider for MemoryDrive {
    async fn create_group(&self, name: &str) -> Result<String, DriveError> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_group")?;
        let id = state.next_id("folder");
        state.folders.insert(
            id.clone(),
            Folder {
                name: name.to_string(),
                permissions: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn add_user(&self, group_id: &str, email: &str) -> Result<String, DriveError> {
        let mut state = self.state.lock().unwrap();
        state.enter("add_user")?;
        let permission_id = state.next_id("perm");
        let folder = state
            .folders
            .get_mut(group_id)
            .ok_or_else(|| not_found(group_id))?;
        folder.permissions.push(Principal {
            permission_id: permission_id.clone(),
            email: Some(email.to_string()),
            role: "reader".to_string(),
        });
        Ok(permission_id)
    }

    async fn delete_user(&self, group_id: &str, permission_id: &str) -> Result<(), DriveError> {
        let mut state = self.state.lock().unwrap();
        state.enter("delete_user")?;
        let folder = state
            .folders
            .get_mut(group_id)
            .ok_or_else(|| not_found(group_id))?;
        let before = folder.permissions.len();
        folder.permissions.retain(|p| p.permission_id != permission_id);
        if folder.permissions.len() == before {
            return Err(not_found(permission_id));
        }
        Ok(())
    }

    async fn list_users(&self, group_id: &str) -> Result<Vec<Principal>, DriveError> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_users")?;
        state
            .folders
            .get(group_id)
            .map(|f| f.permissions.clone())
            .ok_or_else(|| not_found(group_id))
    }

    async fn delete_group(&self, group_id: &str) -> Result<(), DriveError> {
        let mut state = self.state.lock().unwrap();
        state.enter("delete_group")?;
        state
            .folders
            .remove(group_id)
            .ok_or_else(|| not_found(group_id))?;
        state.files.retain(|_, f| f.parent != group_id);
        Ok(())
    }

    async fn upload(
        &self,
        group_id: &str,
        name: &str,
        mime_type: &str,
        content: &Path,
    ) -> Result<DriveFile, DriveError> {
        let bytes = tokio::fs::read(content).await?;
        let mut state = self.state.lock().unwrap();
        state.enter("upload")?;
        if !state.folders.contains_key(group_id) {
            return Err(not_found(group_id));
        }
        let id = state.next_id("file");
        state.files.insert(
            id.clone(),
            StoredFile {
                name: name.to_string(),
                parent: group_id.to_string(),
                mime_type: mime_type.to_string(),
                bytes,
            },
        );
        Ok(DriveFile {
            id,
            name: name.to_string(),
            mime_type: mime_type.to_string(),
        })
    }

    async fn download(&self, file_id: &str) -> Result<FileContent, DriveError> {
        let mut state = self.state.lock().unwrap();
        state.enter("download")?;
        let file = state.files.get(file_id).ok_or_else(|| not_found(file_id))?;
        let chunk = Bytes::from(file.bytes.clone());
        Ok(FileContent {
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            body: Box::pin(tokio_stream::once(Ok::<_, DriveError>(chunk))),
        })
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), DriveError> {
        let mut state = self.state.lock().unwrap();
        state.enter("delete_file")?;
        state
            .files
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| not_found(file_id))
    }

    async fn rename(&self, file_id: &str, name: &str) -> Result<(), DriveError> {
        let mut state = self.state.lock().unwrap();
        state.enter("rename")?;
        if let Some(file) = state.files.get_mut(file_id) {
            file.name = name.to_string();
            return Ok(());
        }
        if let Some(folder) = state.folders.get_mut(file_id) {
            folder.name = name.to_string();
            return Ok(());
        }
        Err(not_found(file_id))
    }
}

#[async_trait]
impl UserDrive for MemoryDrive {
    async fn can_view(&self, access_token: &str, file_id: &str) -> Result<bool, DriveError> {
        let mut state = self.state.lock().unwrap();
        state.enter("can_view")?;
        let Some(email) = access_token.strip_prefix(TOKEN_PREFIX) else {
            return Err(DriveError::Api {
                status: 401,
                message: "Invalid Credentials".into(),
            });
        };
        let folder_id = state
            .files
            .get(file_id)
            .map_or(file_id, |f| f.parent.as_str());
        Ok(state.folders.get(folder_id).is_some_and(|folder| {
            folder
                .permissions
                .iter()
                .any(|p| p.email.as_deref() == Some(email))
        }))
    }
}
