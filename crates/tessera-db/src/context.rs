//! The persistence context contract.
//!
//! A context is one session over one connection: it owns a
//! [`ChangeTracker`], flushes pending writes as a single unit of work, and
//! answers untracked queries. Every method takes `&mut self`, so a context
//! can only be driven by one caller at a time.
//!
//! Two implementations ship with this crate:
//!
//! - [`crate::PgContext`] -- a pooled `PostgreSQL` connection, one
//!   transaction per flush
//! - [`crate::InMemoryContext`] -- tables held in memory, for tests and
//!   local development

use std::time::Duration;

use async_trait::async_trait;
use tessera_types::EntityId;

use crate::entity::Entity;
use crate::error::DbError;
use crate::query::Query;
use crate::tracker::ChangeTracker;

/// Default command timeout applied to every flush and query.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2500);

/// What a successful flush wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Identities assigned to pending inserts, in attach order.
    pub inserted: Vec<EntityId>,
    /// Rows overwritten by pending updates.
    pub updated: u64,
    /// Rows removed by pending deletes.
    pub deleted: u64,
}

/// A single-writer session over a storage engine.
#[async_trait]
pub trait PersistenceContext: Send {
    /// The session's change tracker.
    fn tracker(&self) -> &ChangeTracker;

    /// Mutable access to the change tracker (attach, detach, clear).
    fn tracker_mut(&mut self) -> &mut ChangeTracker;

    /// Upper bound on a single flush or query.
    fn command_timeout(&self) -> Duration;

    /// Write every pending entry as one unit of work.
    ///
    /// On success the tracker has accepted the changes (see
    /// [`ChangeTracker::accept_changes`]). On failure nothing from this flush
    /// is applied and the tracker is left as it was.
    ///
    /// # Errors
    ///
    /// Returns whatever the storage engine reports, [`DbError::RowNotFound`]
    /// if an update or delete matched no row, or [`DbError::Timeout`].
    async fn flush(&mut self) -> Result<FlushReport, DbError>;

    /// Run `query` and return every matching row, untracked.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] for a malformed query, or
    /// whatever the storage engine reports.
    async fn fetch_all<T: Entity>(&mut self, query: &Query<T>) -> Result<Vec<T>, DbError>;
}
