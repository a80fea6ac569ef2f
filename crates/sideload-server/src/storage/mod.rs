//! `SQLite` storage for the Sideload server.
//!
//! Provides persistence for users, apps, authorities, bundles, revision
//! counters and the audit log.

mod db;
mod models;
mod queries;
mod queries_bundle;


pub use db::{DatabaseError, ServerDatabase};
pub use models::*;
pub use queries::{NewApp, NewAuthority};
pub use queries_bundle::NewBundle;
