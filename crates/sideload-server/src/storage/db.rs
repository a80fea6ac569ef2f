//! `SQLite` database handle for the Sideload server.

pub use sideload_core::db::DatabaseError;

sideload_core::define_database!(ServerDatabase, "Server database migrations complete");
