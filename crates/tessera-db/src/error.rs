//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors with context about which step of a write failed. The
//! repository performs no local recovery: whatever the storage engine
//! reports reaches the caller.

use std::time::Duration;

use tessera_types::{EntityId, EntityState, FilterError};

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// An argument was rejected before the session was touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A flush or query ran past the command timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that was cut off.
        operation: &'static str,
        /// The configured command timeout.
        timeout: Duration,
    },

    /// The session already tracks this row under a different state.
    #[error("{table} row {id} is already tracked as {existing}, cannot attach as {requested}")]
    TrackingConflict {
        /// Table of the conflicting row.
        table: &'static str,
        /// Identity of the conflicting row.
        id: EntityId,
        /// State the session currently holds.
        existing: EntityState,
        /// State the caller asked for.
        requested: EntityState,
    },

    /// An update or delete matched no row.
    #[error("{table} row {id} does not exist")]
    RowNotFound {
        /// Table that was written.
        table: &'static str,
        /// Identity that matched nothing.
        id: EntityId,
    },

    /// A chunked write failed after earlier chunks were committed.
    #[error("batch failed after committing {committed} of {total} rows: {source}")]
    PartialBatch {
        /// Rows durably written by the chunks that succeeded.
        committed: usize,
        /// Rows in the whole batch.
        total: usize,
        /// The failure of the chunk that did not commit.
        source: Box<DbError>,
    },

    /// The storage engine rejected a write.
    #[error("storage error: {0}")]
    Storage(String),

    /// A filter could not be validated or evaluated.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The blocking runtime could not be started.
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl DbError {
    /// Whether this error came out of a flush, as opposed to argument
    /// checking, configuration or reads.
    pub const fn is_flush_failure(&self) -> bool {
        matches!(
            self,
            Self::Postgres(_)
                | Self::Timeout { .. }
                | Self::RowNotFound { .. }
                | Self::PartialBatch { .. }
                | Self::Storage(_)
        )
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_batch_reports_progress_and_cause() {
        let err = DbError::PartialBatch {
            committed: 500,
            total: 1200,
            source: Box::new(DbError::Storage(String::from("disk full"))),
        };
        let msg = format!("{err}");
        assert!(msg.contains("500 of 1200"));
        assert!(msg.contains("disk full"));
        assert!(err.is_flush_failure());
    }

    #[test]
    fn argument_errors_are_not_flush_failures() {
        assert!(!DbError::invalid("batch size must be positive").is_flush_failure());
    }
}
