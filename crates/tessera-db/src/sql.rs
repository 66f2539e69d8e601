//! Statement rendering for the `PostgreSQL` context.
//!
//! Uses [`sqlx::QueryBuilder`] with runtime query construction (not
//! compile-time checked) so entity types stay generic. Every value is bound
//! as a parameter; identifiers are spliced only after passing
//! [`is_valid_identifier`].

use sqlx::{Postgres, QueryBuilder};
use tessera_types::{EntityId, EntityState, Filter, Record, Value, is_valid_identifier};

use crate::entity::Entity;
use crate::error::DbError;
use crate::query::Query;
use crate::tracker::ChangeTracker;

/// Bind parameters the `PostgreSQL` wire protocol allows per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// One statement-level unit of a flush.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteStep {
    /// Consecutive pending inserts into one table.
    Insert {
        /// Target table.
        table: &'static str,
        /// Row snapshots, in attach order.
        rows: Vec<Record>,
    },
    /// A single pending update.
    Update {
        /// Target table.
        table: &'static str,
        /// Row identity.
        id: EntityId,
        /// New column values.
        row: Record,
    },
    /// Consecutive pending deletes from one table.
    Delete {
        /// Target table.
        table: &'static str,
        /// Row identities.
        ids: Vec<EntityId>,
    },
}

/// The ordered statements a flush executes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    steps: Vec<WriteStep>,
}

impl WritePlan {
    /// Plan the pending entries of `tracker`, merging consecutive inserts
    /// (and deletes) on the same table into one step.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if a table name is not a plain
    /// identifier.
    pub fn from_tracker(tracker: &ChangeTracker) -> Result<Self, DbError> {
        let mut steps: Vec<WriteStep> = Vec::new();
        for entry in tracker.pending() {
            let table = entry.table();
            if !is_valid_identifier(table) {
                return Err(DbError::invalid(format!("invalid table name {table:?}")));
            }
            match (entry.state(), steps.last_mut()) {
                (EntityState::PendingInsert, Some(WriteStep::Insert { table: t, rows }))
                    if *t == table =>
                {
                    rows.push(entry.object().snapshot());
                }
                (EntityState::PendingInsert, _) => steps.push(WriteStep::Insert {
                    table,
                    rows: vec![entry.object().snapshot()],
                }),
                (EntityState::PendingUpdate, _) => steps.push(WriteStep::Update {
                    table,
                    id: entry.id(),
                    row: entry.object().snapshot(),
                }),
                (EntityState::PendingDelete, Some(WriteStep::Delete { table: t, ids }))
                    if *t == table =>
                {
                    ids.push(entry.id());
                }
                (EntityState::PendingDelete, _) => steps.push(WriteStep::Delete {
                    table,
                    ids: vec![entry.id()],
                }),
                (EntityState::Unchanged | EntityState::Detached, _) => {}
            }
        }
        Ok(Self { steps })
    }

    /// Statements in execution order.
    pub fn steps(&self) -> &[WriteStep] {
        &self.steps
    }

    /// Whether the flush has nothing to write.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Insertable columns of a row: everything except the identity.
pub fn insert_columns(row: &Record) -> Vec<&'static str> {
    row.columns().filter(|c| *c != "id").collect()
}

/// Rows per `INSERT` that keep a statement under the bind-parameter limit.
pub fn rows_per_insert(column_count: usize) -> usize {
    MAX_BIND_PARAMS.checked_div(column_count).unwrap_or(MAX_BIND_PARAMS).max(1)
}

/// `INSERT INTO table (cols) VALUES (...), (...) RETURNING id`.
pub fn insert_statement<'args>(
    table: &str,
    columns: &[&str],
    rows: &[Record],
) -> QueryBuilder<'args, Postgres> {
    let mut qb = QueryBuilder::new(format!("INSERT INTO {table} ("));
    qb.push(columns.join(", "));
    qb.push(") VALUES ");
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push("(");
        for (j, column) in columns.iter().enumerate() {
            if j > 0 {
                qb.push(", ");
            }
            bind_value(&mut qb, row.get(column).unwrap_or(&Value::Null));
        }
        qb.push(")");
    }
    qb.push(" RETURNING id");
    qb
}

/// `UPDATE table SET col = $n, ... WHERE id = $m`.
pub fn update_statement<'args>(table: &str, id: EntityId, row: &Record) -> QueryBuilder<'args, Postgres> {
    let mut qb = QueryBuilder::new(format!("UPDATE {table} SET "));
    let mut first = true;
    for (column, value) in row.iter().filter(|(c, _)| *c != "id") {
        if !first {
            qb.push(", ");
        }
        first = false;
        qb.push(column);
        qb.push(" = ");
        bind_value(&mut qb, value);
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id.into_inner());
    qb
}

/// `DELETE FROM table WHERE id = ANY($1) RETURNING id`.
pub fn delete_statement<'args>(table: &str, ids: &[EntityId]) -> QueryBuilder<'args, Postgres> {
    let raw: Vec<i64> = ids.iter().map(|id| id.into_inner()).collect();
    let mut qb = QueryBuilder::new(format!("DELETE FROM {table} WHERE id = ANY("));
    qb.push_bind(raw);
    qb.push(") RETURNING id");
    qb
}

/// `SELECT * FROM table [WHERE ...] [ORDER BY ...] [LIMIT n] [OFFSET m]`.
///
/// # Errors
///
/// Returns [`DbError::InvalidArgument`] if the query names an invalid
/// identifier.
pub fn select_statement<'args, T: Entity>(query: &Query<T>) -> Result<QueryBuilder<'args, Postgres>, DbError> {
    query.validate()?;

    let mut qb = QueryBuilder::new(format!("SELECT * FROM {}", T::TABLE));
    if let Some(filter) = query.predicate() {
        qb.push(" WHERE ");
        push_filter(&mut qb, filter);
    }
    for (i, (column, order)) in query.ordering().iter().enumerate() {
        qb.push(if i == 0 { " ORDER BY " } else { ", " });
        qb.push(column);
        qb.push(" ");
        qb.push(order.as_sql());
    }
    if let Some(limit) = query.row_limit() {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if let Some(offset) = query.row_offset() {
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
    }
    Ok(qb)
}

/// Render `filter` as a boolean SQL expression.
///
/// Column names must already be validated.
pub fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::Compare { column, cmp, value } => {
            qb.push(column);
            qb.push(" ");
            qb.push(cmp.as_sql());
            qb.push(" ");
            bind_value(qb, value);
        }
        Filter::StartsWith { column, prefix } => {
            qb.push(column);
            qb.push(" LIKE ");
            qb.push_bind(format!("{}%", escape_like(prefix)));
            qb.push(" ESCAPE '\\'");
        }
        Filter::Contains { column, needle } => {
            qb.push(column);
            qb.push(" LIKE ");
            qb.push_bind(format!("%{}%", escape_like(needle)));
            qb.push(" ESCAPE '\\'");
        }
        Filter::IsNull { column } => {
            qb.push(column);
            qb.push(" IS NULL");
        }
        Filter::In { column, values } => {
            if values.is_empty() {
                qb.push("FALSE");
                return;
            }
            qb.push(column);
            qb.push(" IN (");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                bind_value(qb, value);
            }
            qb.push(")");
        }
        Filter::And { filters } => push_group(qb, filters, " AND ", "TRUE"),
        Filter::Or { filters } => push_group(qb, filters, " OR ", "FALSE"),
        Filter::Not { filter } => {
            qb.push("NOT (");
            push_filter(qb, filter);
            qb.push(")");
        }
    }
}

fn push_group(qb: &mut QueryBuilder<'_, Postgres>, filters: &[Filter], joiner: &str, empty: &str) {
    if filters.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            qb.push(joiner);
        }
        push_filter(qb, filter);
    }
    qb.push(")");
}

/// Escape `LIKE` wildcards so `text` matches literally.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Bind one value as a parameter; `NULL` is written literally so it takes
/// the column's type.
fn bind_value(qb: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Null => {
            qb.push("NULL");
        }
        Value::Bool(v) => {
            qb.push_bind(*v);
        }
        Value::Int(v) => {
            qb.push_bind(*v);
        }
        Value::BigInt(v) => {
            qb.push_bind(*v);
        }
        Value::Double(v) => {
            qb.push_bind(*v);
        }
        Value::Text(v) => {
            qb.push_bind(v.clone());
        }
        Value::Decimal(v) => {
            qb.push_bind(*v);
        }
        Value::Timestamp(v) => {
            qb.push_bind(*v);
        }
        Value::Uuid(v) => {
            qb.push_bind(*v);
        }
    }
}
