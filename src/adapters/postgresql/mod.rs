//! PostgreSQL backend
//!
//! Documents, PIDs, version relations and sequences live in four tables created by
//! `migrations/001_initial_schema.sql`.

pub mod backend;
pub mod client;
pub mod models;

pub use backend::PostgresBackend;
pub use client::PostgreSQLClient;
pub use models::{PostgreSQLDocument, PostgreSQLPid};
