//! The lifecycle the probe runs against a scratch table.
//!
//! Rows are tagged with a per-run prefix, so concurrent probes and leftovers
//! from aborted runs never affect the checks.

use sqlx::FromRow;
use tessera_db::{BaseEntity, Entity, PgContext, PostgresPool, Query, Repository};
use tessera_types::{Filter, SortOrder, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::ProbeError;

/// Rows written per run.
const PROBE_ROWS: usize = 12;

/// A scratch row.
#[derive(Debug, Clone, FromRow)]
pub struct ProbeRow {
    #[sqlx(flatten)]
    base: BaseEntity,
    label: String,
    attempt: i32,
}

impl Entity for ProbeRow {
    const TABLE: &'static str = "tessera_probe";
    const COLUMNS: &'static [&'static str] = &["label", "attempt"];

    fn base(&self) -> &BaseEntity {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseEntity {
        &mut self.base
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("label", Value::from(self.label.as_str())),
            ("attempt", Value::from(self.attempt)),
        ]
    }
}

/// What a successful run did.
#[derive(Debug)]
pub struct ProbeReport {
    /// Prefix shared by every row of the run.
    pub tag: String,
    /// Rows inserted.
    pub inserted: usize,
    /// Rows soft-deleted by the filtered deactivate.
    pub deactivated: usize,
    /// Rows removed at the end.
    pub deleted: usize,
}

/// Create the scratch table if it does not exist.
///
/// # Errors
///
/// Returns [`ProbeError::Db`] if the statement fails.
pub async fn ensure_table(pool: &PostgresPool) -> Result<(), ProbeError> {
    sqlx::query(
        r"CREATE TABLE IF NOT EXISTS tessera_probe (
              id BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
              created_date TIMESTAMPTZ NOT NULL,
              updated_date TIMESTAMPTZ NOT NULL,
              updated_by TEXT NOT NULL,
              is_active BOOLEAN NOT NULL DEFAULT TRUE,
              label TEXT NOT NULL,
              attempt INTEGER NOT NULL
          )",
    )
    .execute(pool.pool())
    .await
    .map_err(tessera_db::DbError::from)?;
    Ok(())
}

/// Insert, update, deactivate half by filter, then delete everything.
///
/// # Errors
///
/// Returns [`ProbeError::Db`] if any operation fails, or
/// [`ProbeError::Check`] if a read-back disagrees with what was written.
pub async fn run(repo: &mut Repository<PgContext>) -> Result<ProbeReport, ProbeError> {
    let tag = Uuid::new_v4().simple().to_string();

    let mut rows: Vec<ProbeRow> = (0..PROBE_ROWS)
        .map(|i| ProbeRow {
            base: BaseEntity::new("tessera-probe"),
            label: format!("{tag} {} {i}", if i % 2 == 0 { "even" } else { "odd" }),
            attempt: 0,
        })
        .collect();

    repo.batch_insert(&mut rows).await?;
    info!(tag, rows = rows.len(), "Inserted probe rows");

    for row in &mut rows {
        row.attempt = row.attempt.saturating_add(1);
    }
    repo.batch_update(&rows).await?;
    info!(tag, "Updated probe rows");

    let deactivated = repo
        .batch_deactivate_where::<ProbeRow>(Filter::starts_with("label", format!("{tag} even")))
        .await?;
    info!(tag, deactivated = deactivated.len(), "Deactivated even rows");

    let query = Query::<ProbeRow>::new()
        .filter(Filter::starts_with("label", tag.as_str()))
        .order_by("id", SortOrder::Asc);
    let stored = repo.fetch_all(&query).await?;
    check(stored.len() == rows.len(), || {
        format!("expected {} rows, read {}", rows.len(), stored.len())
    })?;
    check(stored.iter().all(|r| r.attempt == 1), || {
        String::from("an update did not persist")
    })?;
    let active = stored.iter().filter(|r| r.base.is_active).count();
    check(active.saturating_add(deactivated.len()) == rows.len(), || {
        format!("{active} rows still active after deactivating {}", deactivated.len())
    })?;

    repo.batch_delete(&stored).await?;
    let remaining = repo.fetch_all(&query).await?;
    check(remaining.is_empty(), || {
        format!("{} rows survived the delete", remaining.len())
    })?;

    Ok(ProbeReport {
        tag,
        inserted: rows.len(),
        deactivated: deactivated.len(),
        deleted: stored.len(),
    })
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), ProbeError> {
    if condition {
        Ok(())
    } else {
        Err(ProbeError::Check(message()))
    }
}
