//! Data models for Sideload storage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct App {
    pub id: i64,
    pub title: String,
    pub description: String,
    /// Shared folder holding the app's bundles.
    pub file_id: String,
    #[serde(skip_serializing)]
    pub api_token: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Authority {
    pub id: i64,
    pub app_id: i64,
    /// Grant identifier returned by the storage provider; needed to revoke.
    pub permission_id: String,
    pub email: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bundle {
    pub id: i64,
    pub app_id: i64,
    pub file_id: String,
    pub platform_type: i64,
    pub bundle_version: String,
    pub revision: i64,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Bundle {
    pub const fn platform(&self) -> Option<Platform> {
        Platform::from_code(self.platform_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Audit {
    pub id: i64,
    pub user_id: Option<i64>,
    pub resource_kind: i64,
    pub resource_id: i64,
    pub action_kind: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub const fn code(self) -> i64 {
        match self {
            Self::Android => 1,
            Self::Ios => 2,
        }
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Android),
            2 => Some(Self::Ios),
            _ => None,
        }
    }

    /// Platform implied by an uploaded file's name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = std::path::Path::new(name).extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("apk") {
            Some(Self::Android)
        } else if ext.eq_ignore_ascii_case("ipa") {
            Some(Self::Ios)
        } else {
            None
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Android => ".apk",
            Self::Ios => ".ipa",
        }
    }

    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Android => "application/vnd.android.package-archive",
            Self::Ios => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    App = 1,
    Bundle = 2,
    Authority = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Create = 1,
    Delete = 2,
    Download = 3,
}

/// One page of an app's bundles, newest first.
#[derive(Debug, Clone)]
pub struct BundlePage {
    pub bundles: Vec<Bundle>,
    pub total_count: i64,
    pub page: u32,
    pub limit: u32,
}
