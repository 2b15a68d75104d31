/// Persistence layer
///
/// Durable storage for monitors, their state transitions, and the
/// append-only log of check outcomes. Backed by LibSQL (SQLite).
pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl};

use crate::error::ServiceResult;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> ServiceResult<()> {
    migrations::run_migrations(conn).await
}
