//! [`PersistenceContext`] that keeps tables in memory.
//!
//! Each table is an ordered map from identity to the last flushed snapshot,
//! with its own identity counter starting at 1. A flush validates every
//! pending update and delete before applying anything, so a failed flush
//! changes neither the tables nor the tracker.
//!
//! Flushes are counted, and a specific flush can be made to fail or to stall
//! past the command timeout, which is how chunking, partial-batch and timeout
//! behaviour are tested without a database.

use core::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tessera_types::{EntityId, EntityState, Filter, FilterError, Record, SortOrder};

use crate::context::{DEFAULT_COMMAND_TIMEOUT, FlushReport, PersistenceContext};
use crate::entity::{Entity, TrackedObject};
use crate::error::DbError;
use crate::query::Query;
use crate::tracker::ChangeTracker;

#[derive(Default)]
struct Table {
    rows: BTreeMap<EntityId, Box<dyn TrackedObject>>,
    last_id: i64,
}

impl Table {
    const fn next_id(&mut self) -> EntityId {
        self.last_id = self.last_id.saturating_add(1);
        EntityId::new(self.last_id)
    }
}

/// Tables held in process memory.
pub struct InMemoryContext {
    tables: HashMap<&'static str, Table>,
    tracker: ChangeTracker,
    command_timeout: Duration,
    flushes: usize,
    fail_on: Option<usize>,
    stall_on: Option<(usize, Duration)>,
}

impl Default for InMemoryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContext {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            tracker: ChangeTracker::new(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            flushes: 0,
            fail_on: None,
            stall_on: None,
        }
    }

    /// Make the `n`th flush (1-based, counted from creation) fail with
    /// [`DbError::Storage`] without writing anything.
    #[must_use]
    pub const fn with_failure_on_flush(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Make the `n`th flush sleep for `delay` before writing anything.
    #[must_use]
    pub const fn with_stall_on_flush(mut self, n: usize, delay: Duration) -> Self {
        self.stall_on = Some((n, delay));
        self
    }

    /// Override the command timeout applied to each flush.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Number of flushes attempted so far, failed ones included.
    pub const fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Number of rows stored in `table`.
    pub fn rows_in(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    fn check_pending(&self) -> Result<(), DbError> {
        for entry in self.tracker.pending() {
            if matches!(
                entry.state(),
                EntityState::PendingUpdate | EntityState::PendingDelete
            ) {
                let exists = self
                    .tables
                    .get(entry.table())
                    .is_some_and(|t| t.rows.contains_key(&entry.id()));
                if !exists {
                    return Err(DbError::RowNotFound {
                        table: entry.table(),
                        id: entry.id(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn apply_pending(&mut self) -> Result<FlushReport, DbError> {
        let stall = self
            .stall_on
            .filter(|(n, _)| *n == self.flushes)
            .map(|(_, delay)| delay);
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on == Some(self.flushes) {
            return Err(DbError::Storage(format!(
                "flush {} rejected by the in-memory store",
                self.flushes
            )));
        }
        self.check_pending()?;

        let mut report = FlushReport::default();
        for entry in self.tracker.pending() {
            let table = self.tables.entry(entry.table()).or_default();
            match entry.state() {
                EntityState::PendingInsert => {
                    let id = table.next_id();
                    let mut row = entry.object().clone_boxed();
                    row.assign_id(id);
                    table.rows.insert(id, row);
                    report.inserted.push(id);
                }
                EntityState::PendingUpdate => {
                    table.rows.insert(entry.id(), entry.object().clone_boxed());
                    report.updated = report.updated.saturating_add(1);
                }
                EntityState::PendingDelete => {
                    table.rows.remove(&entry.id());
                    report.deleted = report.deleted.saturating_add(1);
                }
                EntityState::Unchanged | EntityState::Detached => {}
            }
        }

        self.tracker.accept_changes(&report.inserted)?;
        Ok(report)
    }
}

#[async_trait]
impl PersistenceContext for InMemoryContext {
    fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    async fn flush(&mut self) -> Result<FlushReport, DbError> {
        self.flushes = self.flushes.saturating_add(1);
        let timeout = self.command_timeout;
        tokio::time::timeout(timeout, self.apply_pending())
            .await
            .map_err(|_elapsed| DbError::Timeout {
                operation: "flush",
                timeout,
            })?
    }

    async fn fetch_all<T: Entity>(&mut self, query: &Query<T>) -> Result<Vec<T>, DbError> {
        query.validate()?;
        let referenced = query
            .predicate()
            .into_iter()
            .flat_map(Filter::columns)
            .chain(query.ordering().iter().map(|(column, _)| column.as_str()));
        for column in referenced {
            if !T::has_column(column) {
                return Err(FilterError::UnknownColumn(column.to_owned()).into());
            }
        }
        let Some(table) = self.tables.get(T::TABLE) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<(Record, T)> = Vec::new();
        for row in table.rows.values() {
            let record = row.snapshot();
            if let Some(filter) = query.predicate() {
                if !filter.matches(&record)? {
                    continue;
                }
            }
            if let Some(entity) = row.as_any().downcast_ref::<T>() {
                matched.push((record, entity.clone()));
            }
        }

        matched.sort_by(|(a, _), (b, _)| compare_records(a, b, query.ordering()));

        let offset = query
            .row_offset()
            .map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX));
        let limit = query
            .row_limit()
            .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, entity)| entity)
            .collect())
    }
}

/// Order two rows the way `PostgreSQL` does by default: `NULL` sorts after
/// every value ascending and before every value descending.
fn compare_records(a: &Record, b: &Record, keys: &[(String, SortOrder)]) -> Ordering {
    for (column, order) in keys {
        let (Some(lhs), Some(rhs)) = (a.get(column), b.get(column)) else {
            continue;
        };
        let ordering = match (lhs.is_null(), rhs.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => lhs.compare(rhs).unwrap_or(Ordering::Equal),
        };
        let ordering = match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
