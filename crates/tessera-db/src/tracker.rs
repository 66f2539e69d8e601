//! Session-scoped change tracking.
//!
//! The tracker is the only mutable state a persistence context carries
//! between operations. It records, per entity snapshot, which write the next
//! flush should apply. Entities with an assigned id are keyed by
//! `(table, id)`; attaching a key that is already tracked under a different
//! state is a conflict, which is why every repository write clears the
//! tracker before attaching.

use core::fmt;

use tessera_types::{EntityId, EntityState};

use crate::entity::{Entity, TrackedObject};
use crate::error::DbError;

/// One tracked entity snapshot and its intended write.
pub struct TrackedEntry {
    object: Box<dyn TrackedObject>,
    state: EntityState,
}

impl TrackedEntry {
    /// The tracked snapshot.
    pub fn object(&self) -> &dyn TrackedObject {
        self.object.as_ref()
    }

    /// The write the next flush applies.
    pub const fn state(&self) -> EntityState {
        self.state
    }

    /// Table of the tracked entity.
    pub fn table(&self) -> &'static str {
        self.object.table_name()
    }

    /// Identity of the tracked entity.
    pub fn id(&self) -> EntityId {
        self.object.tracked_id()
    }

    fn is_keyed(&self, table: &str, id: EntityId) -> bool {
        self.table() == table && self.id() == id && id.is_assigned()
    }
}

impl fmt::Debug for TrackedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedEntry")
            .field("table", &self.table())
            .field("id", &self.id())
            .field("state", &self.state)
            .finish()
    }
}

/// The set of entities a session tracks, in attach order.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    entries: Vec<TrackedEntry>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Track a snapshot of `entity` under `state`.
    ///
    /// Pending inserts are always appended. Any other state requires an
    /// assigned id; re-attaching a tracked key under the same state replaces
    /// its snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] for [`EntityState::Detached`],
    /// for inserting an entity that already has an id, or for any other
    /// state on an entity without one. Returns [`DbError::TrackingConflict`]
    /// if the key is tracked under a different state.
    pub fn attach<T: Entity>(&mut self, entity: &T, state: EntityState) -> Result<(), DbError> {
        let id = entity.id();
        match state {
            EntityState::Detached => {
                return Err(DbError::invalid("cannot attach an entity as detached"));
            }
            EntityState::PendingInsert => {
                if id.is_assigned() {
                    return Err(DbError::invalid(format!(
                        "{} row {id} already has an id and cannot be inserted",
                        T::TABLE
                    )));
                }
                self.entries.push(TrackedEntry {
                    object: Box::new(entity.clone()),
                    state,
                });
                return Ok(());
            }
            EntityState::PendingUpdate | EntityState::PendingDelete | EntityState::Unchanged => {}
        }

        if !id.is_assigned() {
            return Err(DbError::invalid(format!(
                "{} entity without an id cannot be attached as {state}",
                T::TABLE
            )));
        }

        match self.entries.iter_mut().find(|e| e.is_keyed(T::TABLE, id)) {
            Some(existing) if existing.state != state => Err(DbError::TrackingConflict {
                table: T::TABLE,
                id,
                existing: existing.state,
                requested: state,
            }),
            Some(existing) => {
                existing.object = Box::new(entity.clone());
                Ok(())
            }
            None => {
                self.entries.push(TrackedEntry {
                    object: Box::new(entity.clone()),
                    state,
                });
                Ok(())
            }
        }
    }

    /// Stop tracking the row `(table, id)`. Returns whether it was tracked.
    pub fn detach(&mut self, table: &str, id: EntityId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is_keyed(table, id));
        self.entries.len() != before
    }

    /// Drop every tracked entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Current state of the row `(table, id)`.
    pub fn state_of(&self, table: &str, id: EntityId) -> EntityState {
        self.entries
            .iter()
            .find(|e| e.is_keyed(table, id))
            .map_or(EntityState::Detached, |e| e.state)
    }

    /// All entries in attach order.
    pub fn entries(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.entries.iter()
    }

    /// Entries the next flush will write, in attach order.
    pub fn pending(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.entries.iter().filter(|e| e.state.is_pending())
    }

    /// Number of entries the next flush will write.
    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mark a successful flush.
    ///
    /// Pending inserts take `inserted` ids in attach order and, like pending
    /// updates, become [`EntityState::Unchanged`]. Pending deletes leave the
    /// tracker.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Storage`] if `inserted` does not hold exactly one
    /// id per pending insert.
    pub fn accept_changes(&mut self, inserted: &[EntityId]) -> Result<(), DbError> {
        let expected = self
            .entries
            .iter()
            .filter(|e| e.state == EntityState::PendingInsert)
            .count();
        if expected != inserted.len() {
            return Err(DbError::Storage(format!(
                "flush returned {} identities for {expected} inserted rows",
                inserted.len()
            )));
        }

        self.entries
            .retain(|e| e.state != EntityState::PendingDelete);

        let mut ids = inserted.iter();
        for entry in &mut self.entries {
            match entry.state {
                EntityState::PendingInsert => {
                    if let Some(id) = ids.next() {
                        entry.object.assign_id(*id);
                    }
                    entry.state = EntityState::Unchanged;
                }
                EntityState::PendingUpdate => entry.state = EntityState::Unchanged,
                EntityState::PendingDelete | EntityState::Unchanged | EntityState::Detached => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Widget;

    fn persisted(id: i64) -> Widget {
        let mut widget = Widget::new("gear", None);
        widget.base.id = EntityId::new(id);
        widget
    }

    #[test]
    fn different_state_on_same_row_conflicts() {
        let mut tracker = ChangeTracker::new();
        let widget = persisted(3);

        assert!(tracker.attach(&widget, EntityState::Unchanged).is_ok());
        let err = tracker.attach(&widget, EntityState::PendingUpdate);
        assert!(matches!(
            err,
            Err(DbError::TrackingConflict {
                existing: EntityState::Unchanged,
                requested: EntityState::PendingUpdate,
                ..
            })
        ));

        tracker.clear();
        assert!(tracker.attach(&widget, EntityState::PendingUpdate).is_ok());
        assert_eq!(tracker.state_of("widgets", EntityId::new(3)), EntityState::PendingUpdate);
    }

    #[test]
    fn same_state_replaces_snapshot() {
        let mut tracker = ChangeTracker::new();
        let mut widget = persisted(4);
        assert!(tracker.attach(&widget, EntityState::PendingUpdate).is_ok());

        widget.name = String::from("renamed");
        assert!(tracker.attach(&widget, EntityState::PendingUpdate).is_ok());

        assert_eq!(tracker.len(), 1);
        let names: Vec<_> = tracker
            .entries()
            .filter_map(|e| e.object().as_any().downcast_ref::<Widget>())
            .map(|w| w.name.clone())
            .collect();
        assert_eq!(names, vec![String::from("renamed")]);
    }

    #[test]
    fn attach_rejects_mismatched_identity() {
        let mut tracker = ChangeTracker::new();
        assert!(matches!(
            tracker.attach(&persisted(1), EntityState::PendingInsert),
            Err(DbError::InvalidArgument(_))
        ));
        assert!(matches!(
            tracker.attach(&Widget::new("new", None), EntityState::PendingDelete),
            Err(DbError::InvalidArgument(_))
        ));
        assert!(matches!(
            tracker.attach(&persisted(1), EntityState::Detached),
            Err(DbError::InvalidArgument(_))
        ));
        assert!(tracker.is_empty());
    }

    #[test]
    fn accept_changes_settles_every_pending_entry() {
        let mut tracker = ChangeTracker::new();
        assert!(tracker.attach(&Widget::new("a", None), EntityState::PendingInsert).is_ok());
        assert!(tracker.attach(&persisted(7), EntityState::PendingDelete).is_ok());
        assert!(tracker.attach(&Widget::new("b", None), EntityState::PendingInsert).is_ok());
        assert!(tracker.attach(&persisted(8), EntityState::PendingUpdate).is_ok());
        assert_eq!(tracker.pending_count(), 4);

        assert!(tracker.accept_changes(&[EntityId::new(11), EntityId::new(12)]).is_ok());

        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.state_of("widgets", EntityId::new(7)), EntityState::Detached);
        assert_eq!(tracker.state_of("widgets", EntityId::new(8)), EntityState::Unchanged);
        assert_eq!(tracker.state_of("widgets", EntityId::new(11)), EntityState::Unchanged);
        assert_eq!(tracker.state_of("widgets", EntityId::new(12)), EntityState::Unchanged);
    }

    #[test]
    fn accept_changes_rejects_wrong_id_count() {
        let mut tracker = ChangeTracker::new();
        assert!(tracker.attach(&Widget::new("a", None), EntityState::PendingInsert).is_ok());
        assert!(matches!(
            tracker.accept_changes(&[]),
            Err(DbError::Storage(_))
        ));
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn detach_forgets_a_row() {
        let mut tracker = ChangeTracker::new();
        assert!(tracker.attach(&persisted(5), EntityState::PendingUpdate).is_ok());
        assert!(tracker.detach("widgets", EntityId::new(5)));
        assert!(!tracker.detach("widgets", EntityId::new(5)));
        assert!(tracker.is_empty());
    }
}
