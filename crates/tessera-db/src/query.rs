//! Lazy, composable reads.
//!
//! A [`Query`] only describes a read: which rows of `T`, in what order, how
//! many. Nothing touches storage until it is executed through a
//! [`PersistenceContext`]. Results are never tracked, so reads never need
//! clearing before a write.

use core::marker::PhantomData;

use tessera_types::{EntityId, Filter, SortOrder, is_valid_identifier};

use crate::context::PersistenceContext;
use crate::entity::Entity;
use crate::error::DbError;

/// A read over all rows of `T`, optionally narrowed, ordered and paged.
pub struct Query<T> {
    filter: Option<Filter>,
    order: Vec<(String, SortOrder)>,
    limit: Option<u64>,
    offset: Option<u64>,
    entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            order: self.order.clone(),
            limit: self.limit,
            offset: self.offset,
            entity: PhantomData,
        }
    }
}

impl<T: Entity> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Query<T> {
    /// Every row of `T`.
    pub const fn new() -> Self {
        Self {
            filter: None,
            order: Vec::new(),
            limit: None,
            offset: None,
            entity: PhantomData,
        }
    }

    /// The row with identity `id`, if any.
    pub fn by_id(id: EntityId) -> Self {
        Self::new().filter(Filter::eq("id", id))
    }

    /// Narrow the rows; repeated calls are combined with `AND`.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Append a sort key.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order.push((column.into(), order));
        self
    }

    /// Return at most `n` rows.
    #[must_use]
    pub const fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skip the first `n` rows.
    #[must_use]
    pub const fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// The combined filter, if any.
    pub const fn predicate(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Sort keys in priority order.
    pub fn ordering(&self) -> &[(String, SortOrder)] {
        &self.order
    }

    /// Row limit, if any.
    pub const fn row_limit(&self) -> Option<u64> {
        self.limit
    }

    /// Row offset, if any.
    pub const fn row_offset(&self) -> Option<u64> {
        self.offset
    }

    /// Check that the table and every referenced column are plain SQL
    /// identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] naming the first bad identifier.
    pub fn validate(&self) -> Result<(), DbError> {
        if !is_valid_identifier(T::TABLE) {
            return Err(DbError::invalid(format!("invalid table name {:?}", T::TABLE)));
        }
        if let Some(filter) = &self.filter {
            filter
                .validate()
                .map_err(|e| DbError::invalid(e.to_string()))?;
        }
        if let Some((column, _)) = self.order.iter().find(|(c, _)| !is_valid_identifier(c)) {
            return Err(DbError::invalid(format!("invalid sort column {column:?}")));
        }
        Ok(())
    }

    /// Execute against `context` and collect every row.
    ///
    /// # Errors
    ///
    /// See [`PersistenceContext::fetch_all`].
    pub async fn fetch_all<C: PersistenceContext>(&self, context: &mut C) -> Result<Vec<T>, DbError> {
        context.fetch_all(self).await
    }

    /// Execute against `context` and return the first row, if any.
    ///
    /// # Errors
    ///
    /// See [`PersistenceContext::fetch_all`].
    pub async fn first<C: PersistenceContext>(&self, context: &mut C) -> Result<Option<T>, DbError> {
        let single = self.clone().limit(1);
        Ok(context.fetch_all(&single).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Widget;

    #[test]
    fn filters_accumulate_with_and() {
        let query = Query::<Widget>::new()
            .filter(Filter::starts_with("name", "Group A"))
            .filter(Filter::eq("is_active", true));

        let expected = Filter::starts_with("name", "Group A").and(Filter::eq("is_active", true));
        assert_eq!(query.predicate(), Some(&expected));
    }

    #[test]
    fn validate_rejects_bad_sort_column() {
        let query = Query::<Widget>::new().order_by("name desc, (select 1)", SortOrder::Asc);
        assert!(matches!(query.validate(), Err(DbError::InvalidArgument(_))));
        assert!(Query::<Widget>::by_id(EntityId::new(1)).validate().is_ok());
    }
}
