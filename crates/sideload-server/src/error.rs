//! HTTP-facing error type.

use axum::Json;
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sideload_crypto::CryptoError;
use tracing::{error, warn};

use crate::auth::IdentityError;
use crate::drive::DriveError;
use crate::storage::DatabaseError;

/// Response body shared by every JSON answer: `{status, message, content?}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: u16,
    pub message: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, content: T) -> Self {
        Self {
            status: StatusCode::OK.as_u16(),
            message: vec![message.into()],
            content: Some(content),
        }
    }
}

impl Envelope<()> {
    pub fn message(status: StatusCode, message: Vec<String>) -> Self {
        Self {
            status: status.as_u16(),
            message,
            content: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// User input was rejected; every message is shown to the caller.
    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Token is invalid.")]
    InvalidApiToken,

    #[error("Not found")]
    NotFound,

    #[error("Forbidden")]
    Forbidden,

    /// Anonymous request to a page that needs a login.
    #[error("Login required")]
    LoginRequired { next: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Storage(#[from] DriveError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidApiToken => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::LoginRequired { .. } => StatusCode::FOUND,
            Self::Database(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Storage(_)
            | Self::Identity(_)
            | Self::Database(_)
            | Self::Crypto(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A plain `302 Found` to `target`.
pub fn found(target: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, target.to_string())]).into_response()
}

/// Where an anonymous visitor of `path` is sent to log in.
pub fn login_redirect_target(path: &str) -> String {
    format!("/login?next={}", urlencoding::encode(path))
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let messages = match &self {
            Self::LoginRequired { next } => {
                return found(&login_redirect_target(next));
            }
            Self::Validation(messages) => messages.clone(),
            Self::InvalidApiToken | Self::NotFound | Self::Forbidden | Self::BadRequest(_) => {
                vec![self.to_string()]
            }
            Self::Database(e) if e.is_not_found() => vec!["Not found".to_string()],
            Self::Storage(e) => {
                error!(error = %e, "Storage provider call failed");
                vec![e.to_string()]
            }
            Self::Identity(e) => {
                error!(error = %e, "Identity provider call failed");
                vec![e.to_string()]
            }
            Self::Database(_) | Self::Crypto(_) | Self::Internal(_) => {
                error!(error = %self, "Internal error");
                vec!["Internal error".to_string()]
            }
        };
        if status.is_client_error() {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }
        Envelope::message(status, messages).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_lists_every_message() {
        let resp =
            ServerError::Validation(vec!["File is required.".into(), "x".into()]).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["status"], 400);
        assert_eq!(body["message"][0], "File is required.");
        assert_eq!(body["message"][1], "x");
        assert!(body.get("content").is_none());
    }

    #[tokio::test]
    async fn invalid_token_is_401() {
        let resp = ServerError::InvalidApiToken.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["message"][0], "Token is invalid.");
    }

    #[test]
    fn login_required_redirects_with_next() {
        let resp = ServerError::LoginRequired {
            next: "/app/5".into(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[LOCATION], "/login?next=%2Fapp%2F5");
    }

    #[tokio::test]
    async fn storage_message_passes_through() {
        let resp = ServerError::Storage(DriveError::Api {
            status: 500,
            message: "backend exploded".into(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            body_json(resp).await["message"][0]
                .as_str()
                .unwrap()
                .contains("backend exploded")
        );
    }

    #[tokio::test]
    async fn database_details_stay_private() {
        let resp = ServerError::Database(DatabaseError::Query("syntax error near x".into()))
            .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(resp).await["message"][0], "Internal error");

        let resp = ServerError::Database(DatabaseError::NotFound("App 9".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn envelope_with_content() {
        let env = Envelope::ok("Bundle List", serde_json::json!({ "total_count": 0 }));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["status"], 200);
        assert_eq!(value["message"][0], "Bundle List");
        assert_eq!(value["content"]["total_count"], 0);
    }
}
