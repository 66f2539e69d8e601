//! The generic entity repository.
//!
//! Every write follows the same cycle on the context's session: clear the
//! tracker, attach the entities under the intended state, flush. Clearing
//! first means nothing left over from an earlier operation can conflict with
//! or leak into the current one. Batch writes repeat the cycle once per
//! chunk, so each chunk commits on its own; a failure after the first chunk
//! is reported as [`DbError::PartialBatch`].
//!
//! Arguments are validated before the tracker is touched. A rejected call
//! leaves the session exactly as it was and never reaches storage.

use tessera_types::{EntityId, EntityState, Filter};
use tracing::{debug, warn};

use crate::config::BatchingConfig;
use crate::context::{FlushReport, PersistenceContext};
use crate::entity::Entity;
use crate::error::DbError;
use crate::query::Query;

/// CRUD, batch and soft-delete operations over a [`PersistenceContext`].
pub struct Repository<C> {
    context: C,
    batching: BatchingConfig,
}

impl<C: PersistenceContext> Repository<C> {
    /// Wrap `context` with default batch sizes.
    pub fn new(context: C) -> Self {
        Self::with_batching(context, BatchingConfig::default())
    }

    /// Wrap `context` with explicit default batch sizes.
    pub const fn with_batching(context: C, batching: BatchingConfig) -> Self {
        Self { context, batching }
    }

    /// The underlying session.
    pub const fn context(&self) -> &C {
        &self.context
    }

    /// Mutable access to the underlying session.
    pub const fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Give back the underlying session.
    pub fn into_context(self) -> C {
        self.context
    }

    /// Default batch sizes.
    pub const fn batching(&self) -> &BatchingConfig {
        &self.batching
    }

    /// A lazy read over every row of `T`.
    #[allow(clippy::unused_self)]
    pub const fn query<T: Entity>(&self) -> Query<T> {
        Query::new()
    }

    /// Execute `query` and return every row.
    ///
    /// # Errors
    ///
    /// See [`PersistenceContext::fetch_all`].
    pub async fn fetch_all<T: Entity>(&mut self, query: &Query<T>) -> Result<Vec<T>, DbError> {
        query.fetch_all(&mut self.context).await
    }

    /// The row of `T` with identity `id`, if any.
    ///
    /// # Errors
    ///
    /// See [`PersistenceContext::fetch_all`].
    pub async fn find<T: Entity>(&mut self, id: EntityId) -> Result<Option<T>, DbError> {
        Query::by_id(id).first(&mut self.context).await
    }

    /// Insert one entity and write its new identity back in place.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if the entity already has an id,
    /// or whatever the flush reports.
    pub async fn insert<T: Entity>(&mut self, entity: &mut T) -> Result<EntityId, DbError> {
        if entity.id().is_assigned() {
            return Err(DbError::invalid(format!(
                "cannot insert {} row {}: it already has an id",
                T::TABLE,
                entity.id()
            )));
        }

        let report = self.flush_as(core::slice::from_ref(entity), EntityState::PendingInsert).await?;
        let id = report
            .inserted
            .first()
            .copied()
            .ok_or_else(|| DbError::Storage(format!("insert into {} returned no id", T::TABLE)))?;
        entity.base_mut().id = id;
        debug!(table = T::TABLE, %id, "Inserted entity");
        Ok(id)
    }

    /// Overwrite the stored row of one entity.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if the entity has no id,
    /// [`DbError::RowNotFound`] if no row has that id, or whatever the flush
    /// reports.
    pub async fn update<T: Entity>(&mut self, entity: &T) -> Result<(), DbError> {
        require_ids(core::slice::from_ref(entity), "update")?;
        self.flush_as(core::slice::from_ref(entity), EntityState::PendingUpdate).await?;
        debug!(table = T::TABLE, id = %entity.id(), "Updated entity");
        Ok(())
    }

    /// Remove the stored row of one entity. Returns `true` once the row is
    /// gone.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if the entity has no id,
    /// [`DbError::RowNotFound`] if no row has that id, or whatever the flush
    /// reports.
    pub async fn delete<T: Entity>(&mut self, entity: &T) -> Result<bool, DbError> {
        require_ids(core::slice::from_ref(entity), "delete")?;
        self.flush_as(core::slice::from_ref(entity), EntityState::PendingDelete).await?;
        debug!(table = T::TABLE, id = %entity.id(), "Deleted entity");
        Ok(true)
    }

    /// [`Repository::batch_insert_with_size`] with the configured insert
    /// batch size.
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_insert_with_size`].
    pub async fn batch_insert<T: Entity>(&mut self, entities: &mut [T]) -> Result<(), DbError> {
        let size = self.batching.insert_batch_size;
        self.batch_insert_with_size(entities, size).await
    }

    /// Insert `entities` in consecutive chunks of at most `batch_size`, one
    /// flush per chunk, writing each assigned id back in place.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] for a zero batch size or an
    /// entity that already has an id. A flush failure in the first chunk is
    /// returned as is; a later one as [`DbError::PartialBatch`], with the
    /// earlier chunks committed and their ids assigned.
    pub async fn batch_insert_with_size<T: Entity>(
        &mut self,
        entities: &mut [T],
        batch_size: usize,
    ) -> Result<(), DbError> {
        require_batch_size(batch_size)?;
        if let Some(entity) = entities.iter().find(|e| e.id().is_assigned()) {
            return Err(DbError::invalid(format!(
                "cannot insert {} row {}: it already has an id",
                T::TABLE,
                entity.id()
            )));
        }

        let total = entities.len();
        let mut committed = 0_usize;
        for chunk in entities.chunks_mut(batch_size) {
            let report = self
                .flush_as(chunk, EntityState::PendingInsert)
                .await
                .map_err(|source| partial::<T>(source, committed, total))?;
            for (entity, id) in chunk.iter_mut().zip(report.inserted) {
                entity.base_mut().id = id;
            }
            committed = committed.saturating_add(chunk.len());
            debug!(table = T::TABLE, committed, total, "Inserted chunk");
        }
        Ok(())
    }

    /// [`Repository::batch_update_with_size`] with the configured update
    /// batch size.
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_update_with_size`].
    pub async fn batch_update<T: Entity>(&mut self, entities: &[T]) -> Result<(), DbError> {
        let size = self.batching.update_batch_size;
        self.batch_update_with_size(entities, size).await
    }

    /// Overwrite the stored rows of `entities`, one flush per chunk of at
    /// most `batch_size`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] for a zero batch size or an
    /// entity without an id, otherwise as
    /// [`Repository::batch_insert_with_size`].
    pub async fn batch_update_with_size<T: Entity>(
        &mut self,
        entities: &[T],
        batch_size: usize,
    ) -> Result<(), DbError> {
        require_batch_size(batch_size)?;
        require_ids(entities, "update")?;
        self.write_chunks(entities, batch_size, EntityState::PendingUpdate).await
    }

    /// [`Repository::batch_delete_with_size`] with the configured delete
    /// batch size.
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_delete_with_size`].
    pub async fn batch_delete<T: Entity>(&mut self, entities: &[T]) -> Result<(), DbError> {
        let size = self.batching.delete_batch_size;
        self.batch_delete_with_size(entities, size).await
    }

    /// Remove the stored rows of `entities`, one flush per chunk of at most
    /// `batch_size`.
    ///
    /// # Errors
    ///
    /// As [`Repository::batch_update_with_size`].
    pub async fn batch_delete_with_size<T: Entity>(
        &mut self,
        entities: &[T],
        batch_size: usize,
    ) -> Result<(), DbError> {
        require_batch_size(batch_size)?;
        require_ids(entities, "delete")?;
        self.write_chunks(entities, batch_size, EntityState::PendingDelete).await
    }

    /// [`Repository::batch_deactivate_with_size`] with the configured update
    /// batch size.
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_deactivate_with_size`].
    pub async fn batch_deactivate<T: Entity>(&mut self, entities: &mut [T]) -> Result<(), DbError> {
        let size = self.batching.update_batch_size;
        self.batch_deactivate_with_size(entities, size).await
    }

    /// Soft-delete `entities`: clear `is_active` in place, then write them
    /// back as a batch update.
    ///
    /// Nothing is modified if validation fails.
    ///
    /// # Errors
    ///
    /// As [`Repository::batch_update_with_size`].
    pub async fn batch_deactivate_with_size<T: Entity>(
        &mut self,
        entities: &mut [T],
        batch_size: usize,
    ) -> Result<(), DbError> {
        require_batch_size(batch_size)?;
        require_ids(entities, "deactivate")?;
        for entity in entities.iter_mut() {
            entity.base_mut().is_active = false;
        }
        self.write_chunks(entities, batch_size, EntityState::PendingUpdate).await
    }

    /// Soft-delete every row of `T` matching `filter` and return the
    /// deactivated entities.
    ///
    /// The read and the writes are separate operations; rows changed in
    /// between are not re-checked.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] for a malformed filter, or
    /// whatever the read or [`Repository::batch_deactivate`] reports.
    pub async fn batch_deactivate_where<T: Entity>(&mut self, filter: Filter) -> Result<Vec<T>, DbError> {
        let query = Query::<T>::new().filter(filter);
        query.validate()?;
        let mut matched = self.context.fetch_all(&query).await?;
        debug!(table = T::TABLE, matched = matched.len(), "Deactivating matching rows");
        self.batch_deactivate(&mut matched).await?;
        Ok(matched)
    }

    /// One clear-attach-flush cycle per chunk.
    async fn write_chunks<T: Entity>(
        &mut self,
        entities: &[T],
        batch_size: usize,
        state: EntityState,
    ) -> Result<(), DbError> {
        let total = entities.len();
        let mut committed = 0_usize;
        for chunk in entities.chunks(batch_size) {
            self.flush_as(chunk, state)
                .await
                .map_err(|source| partial::<T>(source, committed, total))?;
            committed = committed.saturating_add(chunk.len());
            debug!(table = T::TABLE, %state, committed, total, "Wrote chunk");
        }
        Ok(())
    }

    async fn flush_as<T: Entity>(&mut self, entities: &[T], state: EntityState) -> Result<FlushReport, DbError> {
        let tracker = self.context.tracker_mut();
        tracker.clear();
        for entity in entities {
            tracker.attach(entity, state)?;
        }
        self.context.flush().await
    }
}

fn require_batch_size(batch_size: usize) -> Result<(), DbError> {
    if batch_size == 0 {
        return Err(DbError::invalid("batch size must be positive"));
    }
    Ok(())
}

fn require_ids<T: Entity>(entities: &[T], operation: &str) -> Result<(), DbError> {
    match entities.iter().find(|e| !e.id().is_assigned()) {
        Some(_) => Err(DbError::invalid(format!(
            "cannot {operation} a {} entity that has no id",
            T::TABLE
        ))),
        None => Ok(()),
    }
}

/// Wrap a chunk failure once earlier chunks have committed.
fn partial<T: Entity>(source: DbError, committed: usize, total: usize) -> DbError {
    if committed == 0 {
        return source;
    }
    warn!(table = T::TABLE, committed, total, error = %source, "Batch failed part way");
    DbError::PartialBatch {
        committed,
        total,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use tessera_types::SortOrder;

    use super::*;
    use crate::memory::InMemoryContext;
    use crate::test_support::Widget;

    fn widgets(names: impl IntoIterator<Item = String>) -> Vec<Widget> {
        names.into_iter().map(|n| Widget::new(&n, None)).collect()
    }

    fn numbered(prefix: &str, count: usize) -> Vec<Widget> {
        widgets((1..=count).map(|i| format!("{prefix} {i}")))
    }

    async fn all(repo: &mut Repository<InMemoryContext>) -> Vec<Widget> {
        let query = repo.query::<Widget>().order_by("id", SortOrder::Asc);
        repo.fetch_all(&query).await.unwrap_or_default()
    }

    #[tokio::test]
    async fn insert_assigns_id_and_reads_back() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut widget = Widget::new("gear", Some("spare"));

        let id = repo.insert(&mut widget).await;
        assert!(matches!(id, Ok(id) if id.is_assigned()));
        assert!(widget.base.id.is_assigned());

        let found = repo.find::<Widget>(widget.base.id).await.ok().flatten();
        assert_eq!(found, Some(widget));
    }

    #[tokio::test]
    async fn insert_rejects_assigned_id_without_flushing() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut widget = Widget::new("gear", None);
        assert!(repo.insert(&mut widget).await.is_ok());

        let before = repo.context().flush_count();
        assert!(matches!(repo.insert(&mut widget).await, Err(DbError::InvalidArgument(_))));
        assert_eq!(repo.context().flush_count(), before);
    }

    #[tokio::test]
    async fn update_is_idempotent_in_content() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut widget = Widget::new("gear", None);
        assert!(repo.insert(&mut widget).await.is_ok());

        widget.name = String::from("cog");
        assert!(repo.update(&widget).await.is_ok());
        let first = repo.find::<Widget>(widget.base.id).await.ok().flatten();
        assert!(repo.update(&widget).await.is_ok());
        let second = repo.find::<Widget>(widget.base.id).await.ok().flatten();

        assert_eq!(first, second);
        assert_eq!(second.map(|w| w.name), Some(String::from("cog")));
    }

    #[tokio::test]
    async fn repeated_writes_never_conflict_on_tracking() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut widget = Widget::new("gear", None);
        assert!(repo.insert(&mut widget).await.is_ok());

        // The insert leaves the row tracked as unchanged.
        assert_eq!(
            repo.context().tracker().state_of("widgets", widget.base.id),
            EntityState::Unchanged
        );
        assert!(repo.update(&widget).await.is_ok());
        assert!(repo.batch_deactivate(core::slice::from_mut(&mut widget)).await.is_ok());
        assert!(matches!(repo.delete(&widget).await, Ok(true)));
        assert_eq!(repo.context().rows_in("widgets"), 0);
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_row_fail() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut ghost = Widget::new("ghost", None);
        ghost.base.id = EntityId::new(404);

        assert!(matches!(repo.update(&ghost).await, Err(DbError::RowNotFound { .. })));
        assert!(matches!(repo.delete(&ghost).await, Err(DbError::RowNotFound { .. })));
    }

    #[tokio::test]
    async fn unassigned_ids_are_rejected_before_any_flush() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut seeded = Widget::new("seeded", None);
        assert!(repo.insert(&mut seeded).await.is_ok());
        let tracked = repo.context().tracker().len();

        let lone = Widget::new("lone", None);
        let mut fresh = numbered("fresh", 3);
        assert!(matches!(repo.update(&lone).await, Err(DbError::InvalidArgument(_))));
        assert!(matches!(repo.delete(&lone).await, Err(DbError::InvalidArgument(_))));
        assert!(matches!(repo.batch_update(&fresh).await, Err(DbError::InvalidArgument(_))));
        assert!(matches!(repo.batch_delete(&fresh).await, Err(DbError::InvalidArgument(_))));
        assert!(matches!(repo.batch_deactivate(&mut fresh).await, Err(DbError::InvalidArgument(_))));

        assert!(fresh.iter().all(|w| w.base.is_active));
        assert_eq!(repo.context().flush_count(), 1);
        assert_eq!(repo.context().tracker().len(), tracked);
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut batch = numbered("zero", 2);

        assert!(matches!(
            repo.batch_insert_with_size(&mut batch, 0).await,
            Err(DbError::InvalidArgument(_))
        ));
        assert!(batch.iter().all(|w| !w.base.id.is_assigned()));
        assert_eq!(repo.context().flush_count(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let mut repo = Repository::new(InMemoryContext::new());
        assert!(repo.batch_insert::<Widget>(&mut []).await.is_ok());
        assert!(repo.batch_update::<Widget>(&[]).await.is_ok());
        assert!(repo.batch_delete::<Widget>(&[]).await.is_ok());
        assert_eq!(repo.context().flush_count(), 0);
    }

    #[tokio::test]
    async fn batch_insert_flushes_once_per_chunk() {
        for (count, size, flushes) in [(7, 3, 3), (6, 3, 2), (1, 500, 1), (1200, 500, 3)] {
            let mut repo = Repository::new(InMemoryContext::new());
            let mut batch = numbered("bulk", count);

            assert!(repo.batch_insert_with_size(&mut batch, size).await.is_ok());
            assert_eq!(repo.context().flush_count(), flushes, "{count} rows in chunks of {size}");
            assert!(batch.iter().all(|w| w.base.id.is_assigned()));
            assert_eq!(repo.context().rows_in("widgets"), count);
        }
    }

    #[tokio::test]
    async fn batch_insert_preserves_order() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut batch = numbered("ordered", 5);
        assert!(repo.batch_insert_with_size(&mut batch, 2).await.is_ok());

        let ids: Vec<_> = batch.iter().map(|w| w.base.id.into_inner()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        let names: Vec<_> = all(&mut repo).await.into_iter().map(|w| w.name).collect();
        assert_eq!(names, batch.iter().map(|w| w.name.clone()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failure_after_first_chunk_is_partial() {
        let mut repo = Repository::new(InMemoryContext::new().with_failure_on_flush(2));
        let mut batch = numbered("partial", 5);

        let result = repo.batch_insert_with_size(&mut batch, 2).await;
        assert!(matches!(
            result,
            Err(DbError::PartialBatch { committed: 2, total: 5, ref source })
                if matches!(**source, DbError::Storage(_))
        ));
        assert!(batch.iter().take(2).all(|w| w.base.id.is_assigned()));
        assert!(batch.iter().skip(2).all(|w| !w.base.id.is_assigned()));
        assert_eq!(repo.context().rows_in("widgets"), 2);
    }

    #[tokio::test]
    async fn failure_in_first_chunk_is_returned_unchanged() {
        let mut repo = Repository::new(InMemoryContext::new().with_failure_on_flush(1));
        let mut batch = numbered("first", 3);

        let result = repo.batch_insert_with_size(&mut batch, 2).await;
        assert!(matches!(result, Err(DbError::Storage(_))));
        assert_eq!(repo.context().rows_in("widgets"), 0);
    }

    #[tokio::test]
    async fn batch_update_chunks_like_insert() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut batch = numbered("chunked", 5);
        assert!(repo.batch_insert(&mut batch).await.is_ok());
        assert_eq!(repo.context().flush_count(), 1);

        for widget in &mut batch {
            widget.description = Some(String::from("touched"));
        }
        assert!(repo.batch_update_with_size(&batch, 2).await.is_ok());
        assert_eq!(repo.context().flush_count(), 4);
        assert!(all(&mut repo).await.iter().all(|w| w.description.as_deref() == Some("touched")));
    }

    #[tokio::test]
    async fn batch_delete_leaves_the_complement() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut batch = numbered("doomed", 6);
        assert!(repo.batch_insert(&mut batch).await.is_ok());

        let (gone, kept) = batch.split_at(4);
        assert!(repo.batch_delete_with_size(gone, 3).await.is_ok());

        assert_eq!(all(&mut repo).await, kept.to_vec());
    }

    #[tokio::test]
    async fn deactivate_where_touches_only_matches() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut batch = numbered("Group A", 3);
        batch.extend(numbered("Group B", 4));
        assert!(repo.batch_insert(&mut batch).await.is_ok());

        let deactivated = repo
            .batch_deactivate_where::<Widget>(Filter::starts_with("name", "Group A"))
            .await
            .unwrap_or_default();
        assert_eq!(deactivated.len(), 3);
        assert!(deactivated.iter().all(|w| !w.base.is_active));

        let rows = all(&mut repo).await;
        let active = rows.iter().filter(|w| w.base.is_active).count();
        assert_eq!(active, 4);
        assert!(rows
            .iter()
            .filter(|w| !w.base.is_active)
            .all(|w| w.name.starts_with("Group A")));
    }

    #[tokio::test]
    async fn deactivate_where_with_no_match_does_not_flush() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut batch = numbered("solo", 2);
        assert!(repo.batch_insert(&mut batch).await.is_ok());

        let result = repo
            .batch_deactivate_where::<Widget>(Filter::eq("name", "nobody"))
            .await;
        assert!(matches!(result, Ok(rows) if rows.is_empty()));
        assert_eq!(repo.context().flush_count(), 1);
    }

    #[tokio::test]
    async fn deactivate_where_rejects_bad_column() {
        let mut repo = Repository::new(InMemoryContext::new());
        let result = repo
            .batch_deactivate_where::<Widget>(Filter::eq("name; drop table widgets", "x"))
            .await;
        assert!(matches!(result, Err(DbError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn insert_update_deactivate_scenario() {
        let mut repo = Repository::new(InMemoryContext::new());
        let mut batch = numbered("Test", 10);
        assert!(repo.batch_insert(&mut batch).await.is_ok());

        for widget in &mut batch {
            widget.name.push_str(" Updated");
        }
        assert!(repo.batch_update(&batch).await.is_ok());
        assert!(repo.batch_deactivate(&mut batch).await.is_ok());

        let rows = all(&mut repo).await;
        assert_eq!(rows.len(), 10);
        for (i, widget) in rows.iter().enumerate() {
            assert_eq!(widget.name, format!("Test {} Updated", i.saturating_add(1)));
            assert!(!widget.base.is_active);
        }
    }

    #[tokio::test]
    async fn configured_sizes_drive_default_batches() {
        let batching = BatchingConfig {
            insert_batch_size: 2,
            update_batch_size: 3,
            delete_batch_size: 4,
        };
        let mut repo = Repository::with_batching(InMemoryContext::new(), batching);
        let mut batch = numbered("cfg", 6);

        assert!(repo.batch_insert(&mut batch).await.is_ok());
        assert_eq!(repo.context().flush_count(), 3);
        assert!(repo.batch_deactivate(&mut batch).await.is_ok());
        assert_eq!(repo.context().flush_count(), 5);
        assert!(repo.batch_delete(&batch).await.is_ok());
        assert_eq!(repo.context().flush_count(), 7);
    }
}
