//! Drive v3 REST client.
//!
//! Service-account calls authenticate with [`ServiceAccountTokens`];
//! per-user checks reuse the same HTTP client with the user's own token.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use url::Url;

use super::service_account::ServiceAccountTokens;
use super::{DriveError, DriveFile, FileContent, Principal, StorageProvider, UserDrive};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// API origin, without a trailing slash.
    pub base_url: String,
    pub timeout: Duration,
}

impl DriveConfig {
    pub fn new(timeout: Duration) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
}

impl From<FileResource> for DriveFile {
    fn from(file: FileResource) -> Self {
        Self {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionResource {
    id: String,
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    role: String,
}

#[derive(Debug, Deserialize)]
struct PermissionList {
    #[serde(default)]
    permissions: Vec<PermissionResource>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug)]
pub struct DriveClient {
    http: reqwest::Client,
    base_url: String,
    tokens: ServiceAccountTokens,
}

impl DriveClient {
    pub fn new(config: &DriveConfig, tokens: ServiceAccountTokens) -> Result<Self, DriveError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| DriveError::Config(format!("base_url: {e}")))?;

        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    fn files_url(&self, path: &str) -> String {
        format!("{}/drive/v3/files{path}", self.base_url)
    }

    fn upload_url(&self, file_id: &str) -> String {
        format!(
            "{}/upload/drive/v3/files/{file_id}?uploadType=media",
            self.base_url
        )
    }

    async fn bearer(&self) -> Result<String, DriveError> {
        Ok(format!("Bearer {}", self.tokens.access_token().await?))
    }

    /// Turn a non-success response into `DriveError::Api`, keeping the
    /// provider's own message when the body carries one.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, DriveError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body).map_or_else(
            |_| status.canonical_reason().unwrap_or("Unknown").to_string(),
            |e| e.error.message,
        );
        Err(DriveError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, DriveError> {
        resp.json()
            .await
            .map_err(|e| DriveError::InvalidResponse(e.to_string()))
    }

    async fn get_metadata(&self, file_id: &str) -> Result<FileResource, DriveError> {
        let resp = self
            .http
            .get(self.files_url(&format!("/{file_id}?fields=id,name,mimeType")))
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;
        Self::json(Self::check(resp).await?).await
    }
}

#[async_trait]
impl StorageProvider for DriveClient {
    #[instrument(skip(self))]
    async fn create_group(&self, name: &str) -> Result<String, DriveError> {
        let resp = self
            .http
            .post(self.files_url(""))
            .header(AUTHORIZATION, self.bearer().await?)
            .json(&json!({ "name": name, "mimeType": FOLDER_MIME }))
            .send()
            .await?;
        let folder: FileResource = Self::json(Self::check(resp).await?).await?;
        debug!(folder_id = %folder.id, "Folder created");
        Ok(folder.id)
    }

    #[instrument(skip(self))]
    async fn add_user(&self, group_id: &str, email: &str) -> Result<String, DriveError> {
        let resp = self
            .http
            .post(self.files_url(&format!(
                "/{group_id}/permissions?sendNotificationEmail=false"
            )))
            .header(AUTHORIZATION, self.bearer().await?)
            .json(&json!({ "type": "user", "role": "reader", "emailAddress": email }))
            .send()
            .await?;
        let permission: PermissionResource = Self::json(Self::check(resp).await?).await?;
        Ok(permission.id)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, group_id: &str, permission_id: &str) -> Result<(), DriveError> {
        let resp = self
            .http
            .delete(self.files_url(&format!("/{group_id}/permissions/{permission_id}")))
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn list_users(&self, group_id: &str) -> Result<Vec<Principal>, DriveError> {
        let resp = self
            .http
            .get(self.files_url(&format!(
                "/{group_id}/permissions?fields=permissions(id,emailAddress,role)"
            )))
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;
        let list: PermissionList = Self::json(Self::check(resp).await?).await?;
        Ok(list
            .permissions
            .into_iter()
            .map(|p| Principal {
                permission_id: p.id,
                email: p.email_address,
                role: p.role,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn delete_group(&self, group_id: &str) -> Result<(), DriveError> {
        self.delete_file(group_id).await
    }

    #[instrument(skip(self))]
    async fn upload(
        &self,
        group_id: &str,
        name: &str,
        mime_type: &str,
        content: &Path,
    ) -> Result<DriveFile, DriveError> {
        // Metadata first, then content; a failed content upload leaves an
        // empty file behind that we remove again.
        let resp = self
            .http
            .post(self.files_url(""))
            .header(AUTHORIZATION, self.bearer().await?)
            .json(&json!({ "name": name, "mimeType": mime_type, "parents": [group_id] }))
            .send()
            .await?;
        let created: FileResource = Self::json(Self::check(resp).await?).await?;

        let uploaded = async {
            let file = tokio::fs::File::open(content).await?;
            let size = file.metadata().await?.len();
            let resp = self
                .http
                .patch(self.upload_url(&created.id))
                .header(AUTHORIZATION, self.bearer().await?)
                .header(CONTENT_TYPE, mime_type)
                .header(CONTENT_LENGTH, size)
                .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
                .send()
                .await?;
            debug!(size, "Content uploaded");
            Self::json::<FileResource>(Self::check(resp).await?).await
        }
        .await;

        match uploaded {
            Ok(file) => Ok(file.into()),
            Err(e) => {
                if let Err(cleanup) = self.delete_file(&created.id).await {
                    tracing::warn!(
                        file_id = %created.id,
                        error = %cleanup,
                        "Failed to remove partial upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn download(&self, file_id: &str) -> Result<FileContent, DriveError> {
        let meta = self.get_metadata(file_id).await?;
        let resp = self
            .http
            .get(self.files_url(&format!("/{file_id}?alt=media")))
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;
        let body = Self::check(resp)
            .await?
            .bytes_stream()
            .map(|chunk| chunk.map_err(DriveError::from));
        Ok(FileContent {
            name: meta.name,
            mime_type: meta.mime_type,
            body: Box::pin(body),
        })
    }

    #[instrument(skip(self))]
    async fn delete_file(&self, file_id: &str) -> Result<(), DriveError> {
        let resp = self
            .http
            .delete(self.files_url(&format!("/{file_id}")))
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rename(&self, file_id: &str, name: &str) -> Result<(), DriveError> {
        let resp = self
            .http
            .patch(self.files_url(&format!("/{file_id}")))
            .header(AUTHORIZATION, self.bearer().await?)
            .json(&json!({ "name": name }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl UserDrive for DriveClient {
    async fn can_view(&self, access_token: &str, file_id: &str) -> Result<bool, DriveError> {
        let resp = self
            .http
            .get(self.files_url(&format!("/{file_id}?fields=id")))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await?;
        match Self::check(resp).await {
            Ok(_) => Ok(true),
            Err(DriveError::Api {
                status: 403 | 404, ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
