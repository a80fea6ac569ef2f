//! Sideload Server Library
//!
//! Internal mobile-app distribution over a shared cloud drive:
//! - OAuth login with domain and per-app allow-lists
//! - Apps backed by shared folders, with authorities kept in sync
//! - Bundle upload, paging and HMAC-signed install links
//! - A token-authenticated JSON API for CI uploads

pub mod apps;
pub mod auth;
pub mod authority;
pub mod bundles;
pub mod drive;
pub mod error;
pub mod gate;
pub mod manifest;
pub mod package;
pub mod routes;
pub mod state;
pub mod storage;
pub mod urls;

#[cfg(test)]
pub(crate) mod testing;

pub use routes::build_router;
pub use state::AppState;
