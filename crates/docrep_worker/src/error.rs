//! Error types for the replication worker.

use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Result type for database collaborator calls.
pub type DbResult<T> = Result<T, DbError>;

/// Errors reported by a database handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// The database answered a write with a structured error for the whole call.
    ///
    /// The worker downgrades the affected documents to write failures and
    /// keeps going.
    #[error("write rejected by {db}: {reason}")]
    Rejected {
        /// Database name.
        db: String,
        /// Error reason reported by the database.
        reason: String,
    },

    /// The database could not be reached or failed internally.
    #[error("database {db} unavailable: {message}")]
    Unavailable {
        /// Database name.
        db: String,
        /// Error message.
        message: String,
    },
}

impl DbError {
    /// Creates a structured write rejection.
    pub fn rejected(db: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            db: db.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unavailability error.
    pub fn unavailable(db: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            db: db.into(),
            message: message.into(),
        }
    }

    /// Returns true if this is a structured write rejection.
    pub fn is_rejection(&self) -> bool {
        matches!(self, DbError::Rejected { .. })
    }
}

/// Reasons a replication worker terminates abnormally.
///
/// Every variant is fatal at this layer; an external supervisor decides
/// whether to restart the session from its last checkpoint.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A database call failed.
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// The change-feed supplier failed.
    #[error("change feed error: {0}")]
    ChangeFeed(String),

    /// The session coordinator failed or went away.
    #[error("coordinator error: {0}")]
    Coordinator(String),

    /// The compaction notifier link was lost.
    #[error("compaction notifier died")]
    NotifierDied,

    /// A document reader terminated abnormally.
    #[error("reader died: {0}")]
    ReaderDied(#[source] Box<WorkerError>),

    /// The batch writer terminated abnormally.
    #[error("writer died: {0}")]
    WriterDied(#[source] Box<WorkerError>),

    /// The queue-fetch driver terminated abnormally.
    #[error("driver died: {0}")]
    DriverDied(#[source] Box<WorkerError>),

    /// A child task panicked or was cancelled.
    #[error("task {task} failed: {message}")]
    TaskFailed {
        /// Which task failed.
        task: &'static str,
        /// Panic or cancellation message.
        message: String,
    },

    /// A caller broke the worker's call contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The worker held state when the change feed was exhausted.
    #[error("worker not idle at change feed exhaustion: {0}")]
    NotIdleAtExit(String),

    /// Document encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The worker is no longer running.
    #[error("worker is gone")]
    WorkerGone,
}

impl WorkerError {
    /// Returns true if the error is a broken call contract or state invariant.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            WorkerError::Protocol(_) | WorkerError::NotIdleAtExit(_)
        )
    }

    /// Returns the innermost cause, unwrapping child-death wrappers.
    pub fn root_cause(&self) -> &WorkerError {
        match self {
            WorkerError::ReaderDied(inner)
            | WorkerError::WriterDied(inner)
            | WorkerError::DriverDied(inner) => inner.root_cause(),
            other => other,
        }
    }
}
