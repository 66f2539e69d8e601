//! [`PersistenceContext`] over one pooled `PostgreSQL` connection.
//!
//! Each flush plans the tracker's pending entries into statements and runs
//! them inside a single transaction: either every pending write commits or
//! none does. Reads go straight to the connection and are never tracked.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgConnection, Postgres};
use tessera_types::EntityId;

use crate::context::{FlushReport, PersistenceContext};
use crate::entity::Entity;
use crate::error::DbError;
use crate::query::Query;
use crate::sql::{self, WritePlan, WriteStep};
use crate::tracker::ChangeTracker;

/// A session pinned to one pooled connection.
pub struct PgContext {
    conn: PoolConnection<Postgres>,
    tracker: ChangeTracker,
    command_timeout: Duration,
}

impl PgContext {
    /// Wrap an acquired connection.
    pub const fn new(conn: PoolConnection<Postgres>, command_timeout: Duration) -> Self {
        Self {
            conn,
            tracker: ChangeTracker::new(),
            command_timeout,
        }
    }

    /// The underlying connection, for statements outside the repository
    /// (schema setup, ad hoc reads).
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

#[async_trait]
impl PersistenceContext for PgContext {
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
        let plan = WritePlan::from_tracker(&self.tracker)?;
        if plan.is_empty() {
            return Ok(FlushReport::default());
        }

        let timeout = self.command_timeout;
        let report = tokio::time::timeout(timeout, execute_plan(&mut self.conn, &plan))
            .await
            .map_err(|_elapsed| DbError::Timeout {
                operation: "flush",
                timeout,
            })??;

        self.tracker.accept_changes(&report.inserted)?;
        tracing::debug!(
            inserted = report.inserted.len(),
            updated = report.updated,
            deleted = report.deleted,
            "Flushed pending changes"
        );
        Ok(report)
    }

    async fn fetch_all<T: Entity>(&mut self, query: &Query<T>) -> Result<Vec<T>, DbError> {
        let mut qb = sql::select_statement(query)?;
        let timeout = self.command_timeout;
        let rows = tokio::time::timeout(
            timeout,
            qb.build_query_as::<T>().fetch_all(&mut *self.conn),
        )
        .await
        .map_err(|_elapsed| DbError::Timeout {
            operation: "query",
            timeout,
        })??;
        Ok(rows)
    }
}

/// Run every step of `plan` in one transaction.
///
/// Returning early drops the transaction, which rolls it back.
async fn execute_plan(conn: &mut PgConnection, plan: &WritePlan) -> Result<FlushReport, DbError> {
    let mut tx = Connection::begin(conn).await?;
    let mut report = FlushReport::default();

    for step in plan.steps() {
        match step {
            WriteStep::Insert { table, rows } => {
                let columns = rows.first().map(sql::insert_columns).unwrap_or_default();
                for chunk in rows.chunks(sql::rows_per_insert(columns.len())) {
                    let mut qb = sql::insert_statement(table, &columns, chunk);
                    let mut ids: Vec<i64> = qb.build_query_scalar().fetch_all(&mut *tx).await?;
                    // Identity values are handed out in VALUES order.
                    ids.sort_unstable();
                    report.inserted.extend(ids.into_iter().map(EntityId::new));
                }
            }
            WriteStep::Update { table, id, row } => {
                let mut qb = sql::update_statement(table, *id, row);
                let result = qb.build().execute(&mut *tx).await?;
                if result.rows_affected() == 0 {
                    return Err(DbError::RowNotFound { table: *table, id: *id });
                }
                report.updated = report.updated.saturating_add(result.rows_affected());
            }
            WriteStep::Delete { table, ids } => {
                let mut qb = sql::delete_statement(table, ids);
                let deleted: Vec<i64> = qb.build_query_scalar().fetch_all(&mut *tx).await?;
                if let Some(missing) = ids.iter().find(|id| !deleted.contains(&id.into_inner())) {
                    return Err(DbError::RowNotFound { table: *table, id: *missing });
                }
                report.deleted = report
                    .deleted
                    .saturating_add(u64::try_from(deleted.len()).unwrap_or(u64::MAX));
            }
        }
    }

    tx.commit().await?;
    Ok(report)
}
