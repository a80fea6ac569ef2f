//! Sideload Core Library
//!
//! Shared functionality for Sideload components:
//! - Process-wide settings and service-account key loading
//! - `SQLite` pool helpers and the database error type
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod tracing_init;

pub use config::{ServiceAccountKey, Settings};
pub use error::{Error, Result};
