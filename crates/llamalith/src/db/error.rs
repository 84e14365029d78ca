//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A stored status string doesn't match any known job status.
    #[error("Unknown job status '{0}'")]
    UnknownStatus(String),

    /// No job exists with the given id.
    #[error("Job {0} not found")]
    JobNotFound(i64),

    /// A terminal write was attempted against a job that is not `processing`.
    #[error("Job {id} is '{status}', not 'processing'; refusing terminal write")]
    InvalidTransition { id: i64, status: String },
}
