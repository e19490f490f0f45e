//! Database layer for John DAO.
//!
//! Provides the SQLite connection pool (via `r2d2`), embedded SQL
//! migrations, a [`DocumentStore`](johndao_sync::DocumentStore) persisted in
//! SQLite, and the job-run log used by the scheduled functions.
//!
//! # Design decisions
//!
//! - **One `documents` table**: documents are schemaless JSON addressed by
//!   path, so the table stores the path, its collection, and the JSON text.
//!   Queries filter in process after reading one collection.
//! - **In-process listeners**: change notification is driven by the writes
//!   that go through [`SqliteDocumentStore`].

mod error;
mod jobs;
mod migrations;
mod pool;
mod store;

pub use error::DbError;
pub use jobs::{last_job_run, record_job_run, JobRun};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings};
pub use store::SqliteDocumentStore;

/// Opens a pool on `db_path` and applies pending migrations.
///
/// # Errors
///
/// Returns [`DbError`] if the pool cannot be built or a migration fails.
pub fn open(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, DbError> {
    let pool = create_pool(db_path, settings)?;
    let applied = run_migrations(&*pool.get()?)?;
    tracing::info!(path = db_path, applied, "database ready");
    Ok(pool)
}
