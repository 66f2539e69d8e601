//! Synchronous front end to [`Repository`].
//!
//! [`BlockingRepository`] owns a current-thread tokio runtime and drives the
//! async repository to completion on it, one call at a time. It must not be
//! used from inside another tokio runtime: `block_on` panics there.

use core::future::Future;

use tessera_types::{EntityId, Filter};
use tokio::runtime::{Builder, Runtime};

use crate::config::TesseraConfig;
use crate::context::PersistenceContext;
use crate::entity::Entity;
use crate::error::DbError;
use crate::pg_context::PgContext;
use crate::postgres::PostgresPool;
use crate::query::Query;
use crate::repository::Repository;

/// A [`Repository`] with blocking methods.
pub struct BlockingRepository<C> {
    runtime: Runtime,
    // Only `None` while dropping.
    inner: Option<Repository<C>>,
}

impl<C: PersistenceContext> BlockingRepository<C> {
    /// Drive `repository` on a new current-thread runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Runtime`] if the runtime cannot be started.
    pub fn new(repository: Repository<C>) -> Result<Self, DbError> {
        Self::build(async move { Ok(repository) })
    }

    /// Start a runtime and create the repository on it.
    ///
    /// Use this when the context itself needs the runtime to be built, as a
    /// pooled connection does.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Runtime`] if the runtime cannot be started, or
    /// whatever `make` fails with.
    pub fn build<F>(make: F) -> Result<Self, DbError>
    where
        F: Future<Output = Result<Repository<C>, DbError>>,
    {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let repository = runtime.block_on(make)?;
        Ok(Self {
            runtime,
            inner: Some(repository),
        })
    }

    /// The wrapped async repository.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Runtime`] if the repository has been shut down.
    pub fn repository(&self) -> Result<&Repository<C>, DbError> {
        self.inner.as_ref().ok_or_else(shut_down)
    }

    /// The underlying session.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Runtime`] if the repository has been shut down.
    pub fn context(&self) -> Result<&C, DbError> {
        self.repository().map(Repository::context)
    }

    fn parts(&mut self) -> Result<(&Runtime, &mut Repository<C>), DbError> {
        let repository = self.inner.as_mut().ok_or_else(shut_down)?;
        Ok((&self.runtime, repository))
    }

    /// Blocking [`Repository::fetch_all`].
    ///
    /// # Errors
    ///
    /// See [`Repository::fetch_all`].
    pub fn fetch_all<T: Entity>(&mut self, query: &Query<T>) -> Result<Vec<T>, DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.fetch_all(query))
    }

    /// Blocking [`Repository::find`].
    ///
    /// # Errors
    ///
    /// See [`Repository::find`].
    pub fn find<T: Entity>(&mut self, id: EntityId) -> Result<Option<T>, DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.find(id))
    }

    /// Blocking [`Repository::insert`].
    ///
    /// # Errors
    ///
    /// See [`Repository::insert`].
    pub fn insert<T: Entity>(&mut self, entity: &mut T) -> Result<EntityId, DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.insert(entity))
    }

    /// Blocking [`Repository::update`].
    ///
    /// # Errors
    ///
    /// See [`Repository::update`].
    pub fn update<T: Entity>(&mut self, entity: &T) -> Result<(), DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.update(entity))
    }

    /// Blocking [`Repository::delete`].
    ///
    /// # Errors
    ///
    /// See [`Repository::delete`].
    pub fn delete<T: Entity>(&mut self, entity: &T) -> Result<bool, DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.delete(entity))
    }

    /// Blocking [`Repository::batch_insert`].
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_insert_with_size`].
    pub fn batch_insert<T: Entity>(&mut self, entities: &mut [T]) -> Result<(), DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.batch_insert(entities))
    }

    /// Blocking [`Repository::batch_insert_with_size`].
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_insert_with_size`].
    pub fn batch_insert_with_size<T: Entity>(
        &mut self,
        entities: &mut [T],
        batch_size: usize,
    ) -> Result<(), DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.batch_insert_with_size(entities, batch_size))
    }

    /// Blocking [`Repository::batch_update`].
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_update_with_size`].
    pub fn batch_update<T: Entity>(&mut self, entities: &[T]) -> Result<(), DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.batch_update(entities))
    }

    /// Blocking [`Repository::batch_update_with_size`].
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_update_with_size`].
    pub fn batch_update_with_size<T: Entity>(
        &mut self,
        entities: &[T],
        batch_size: usize,
    ) -> Result<(), DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.batch_update_with_size(entities, batch_size))
    }

    /// Blocking [`Repository::batch_delete`].
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_delete_with_size`].
    pub fn batch_delete<T: Entity>(&mut self, entities: &[T]) -> Result<(), DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.batch_delete(entities))
    }

    /// Blocking [`Repository::batch_delete_with_size`].
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_delete_with_size`].
    pub fn batch_delete_with_size<T: Entity>(
        &mut self,
        entities: &[T],
        batch_size: usize,
    ) -> Result<(), DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.batch_delete_with_size(entities, batch_size))
    }

    /// Blocking [`Repository::batch_deactivate`].
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_deactivate_with_size`].
    pub fn batch_deactivate<T: Entity>(&mut self, entities: &mut [T]) -> Result<(), DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.batch_deactivate(entities))
    }

    /// Blocking [`Repository::batch_deactivate_with_size`].
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_deactivate_with_size`].
    pub fn batch_deactivate_with_size<T: Entity>(
        &mut self,
        entities: &mut [T],
        batch_size: usize,
    ) -> Result<(), DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.batch_deactivate_with_size(entities, batch_size))
    }

    /// Blocking [`Repository::batch_deactivate_where`].
    ///
    /// # Errors
    ///
    /// See [`Repository::batch_deactivate_where`].
    pub fn batch_deactivate_where<T: Entity>(&mut self, filter: Filter) -> Result<Vec<T>, DbError> {
        let (rt, repo) = self.parts()?;
        rt.block_on(repo.batch_deactivate_where(filter))
    }
}

impl BlockingRepository<PgContext> {
    /// Connect to `PostgreSQL` and open one session, using the configured
    /// pool settings and batch sizes.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Runtime`] if the runtime cannot be started, or
    /// [`DbError::Config`]/[`DbError::Postgres`] if connecting fails.
    pub fn connect(config: &TesseraConfig) -> Result<Self, DbError> {
        let pg = config.database.to_postgres_config();
        let batching = config.batching;
        Self::build(async move {
            let pool = PostgresPool::connect(&pg).await?;
            Ok(Repository::with_batching(pool.context().await?, batching))
        })
    }
}

impl<C> Drop for BlockingRepository<C> {
    fn drop(&mut self) {
        // Pooled connections hand themselves back to the pool on a runtime
        // task, so the repository must drop inside the runtime's context.
        let _guard = self.runtime.enter();
        drop(self.inner.take());
    }
}

fn shut_down() -> DbError {
    DbError::Runtime(std::io::Error::other("blocking repository has been shut down"))
}

#[cfg(test)]
mod tests {
    use tessera_types::SortOrder;

    use super::*;
    use crate::memory::InMemoryContext;
    use crate::test_support::Widget;

    fn blocking() -> Result<BlockingRepository<InMemoryContext>, DbError> {
        BlockingRepository::new(Repository::new(InMemoryContext::new()))
    }

    #[test]
    fn mirrors_the_async_lifecycle() -> Result<(), DbError> {
        let mut repo = blocking()?;
        let mut batch: Vec<_> = (1..=4).map(|i| Widget::new(&format!("Test {i}"), None)).collect();

        assert!(repo.batch_insert_with_size(&mut batch, 3).is_ok());
        assert!(batch.iter().all(|w| w.base.id.is_assigned()));

        let deactivated = repo
            .batch_deactivate_where::<Widget>(Filter::eq("name", "Test 2"))
            .unwrap_or_default();
        assert_eq!(deactivated.len(), 1);

        let (gone, kept) = batch.split_at(1);
        assert!(repo.batch_delete(gone).is_ok());

        let query = Query::<Widget>::new().order_by("id", SortOrder::Asc);
        let rows = repo.fetch_all(&query).unwrap_or_default();
        assert_eq!(rows.len(), kept.len());
        assert_eq!(rows.iter().filter(|w| !w.base.is_active).count(), 1);
        assert_eq!(repo.context()?.flush_count(), 4);
        Ok(())
    }

    #[test]
    fn single_entity_calls_round_trip() -> Result<(), DbError> {
        let mut repo = blocking()?;
        let mut widget = Widget::new("gear", None);

        let id = repo.insert(&mut widget)?;
        assert!(id.is_assigned());

        widget.description = Some(String::from("oiled"));
        assert!(repo.update(&widget).is_ok());
        assert_eq!(repo.find::<Widget>(id).ok().flatten(), Some(widget.clone()));
        assert!(matches!(repo.delete(&widget), Ok(true)));
        assert_eq!(repo.find::<Widget>(id)?, None);
        Ok(())
    }

    #[test]
    fn build_propagates_construction_errors() {
        let result = BlockingRepository::<InMemoryContext>::build(async {
            Err(DbError::Config(String::from("no database")))
        });
        assert!(matches!(result, Err(DbError::Config(_))));
    }
}
