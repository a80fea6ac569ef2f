//! Absolute URLs for links handed to browsers, devices and CI clients.

use axum::extract::FromRequestParts;
use axum::http::header::HOST;
use axum::http::request::Parts;
use sideload_crypto::{CryptoError, LinkBinding, LinkSigner};

use crate::error::ServerError;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Scheme and host the request was addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: &'static str,
    pub host: String,
}

impl Origin {
    pub fn from_parts(parts: &Parts) -> Option<Self> {
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()))
            .filter(|h| !h.is_empty())?;
        let https = parts
            .headers
            .get(FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|p| p.eq_ignore_ascii_case("https"));
        Some(Self {
            scheme: if https { "https" } else { "http" },
            host,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}://{}{path}", self.scheme, self.host)
    }

    /// A freshly signed GET link to `path` on this origin.
    pub fn signed_url(&self, signer: &LinkSigner, path: &str) -> Result<String, CryptoError> {
        let link = signer.issue(&LinkBinding::get(&self.host, path))?;
        Ok(format!("{}?{}", self.url(path), link.query_string()))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Origin {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_parts(parts)
            .ok_or_else(|| ServerError::BadRequest("Host header is required".into()))
    }
}

pub fn bundle_path(bundle_id: i64) -> String {
    format!("/bundle/{bundle_id}")
}

pub fn download_path(bundle_id: i64) -> String {
    format!("/bundle/{bundle_id}/download")
}

pub fn plist_path(bundle_id: i64) -> String {
    format!("/bundle/{bundle_id}/download_plist")
}

pub fn install_path(bundle_id: i64) -> String {
    format!("/bundle/{bundle_id}/install")
}

/// Link the iOS installer follows to fetch a manifest.
pub fn itms_services_url(manifest_url: &str) -> String {
    format!(
        "itms-services://?action=download-manifest&url={}",
        urlencoding::encode(manifest_url)
    )
}
