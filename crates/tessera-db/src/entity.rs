//! The base shape every persisted type embeds, and the trait that makes a
//! type persistable.
//!
//! A persisted type holds a [`BaseEntity`] (identity, audit columns and the
//! soft-delete flag) next to its own columns, names its table, and decodes
//! from a `PostgreSQL` row:
//!
//! ```ignore
//! #[derive(Debug, Clone, sqlx::FromRow)]
//! struct Widget {
//!     #[sqlx(flatten)]
//!     base: BaseEntity,
//!     name: String,
//! }
//!
//! impl Entity for Widget {
//!     const TABLE: &'static str = "widgets";
//!     const COLUMNS: &'static [&'static str] = &["name"];
//!     fn base(&self) -> &BaseEntity { &self.base }
//!     fn base_mut(&mut self) -> &mut BaseEntity { &mut self.base }
//!     fn columns(&self) -> Vec<(&'static str, Value)> {
//!         vec![("name", Value::from(self.name.as_str()))]
//!     }
//! }
//! ```

use std::any::Any;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use tessera_types::{EntityId, Record, Value};

/// `TIMESTAMPTZ` keeps microseconds; anything finer is lost on the round trip.
const TIMESTAMP_PRECISION_DIGITS: u16 = 6;

/// Columns shared by every persisted type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseEntity {
    /// Database-assigned identity, [`EntityId::UNASSIGNED`] before insert.
    pub id: EntityId,
    /// Creation time, supplied by the caller.
    pub created_date: DateTime<Utc>,
    /// Last modification time, supplied by the caller.
    pub updated_date: DateTime<Utc>,
    /// Who made the last modification.
    pub updated_by: String,
    /// Soft-delete flag; `false` means logically deleted.
    pub is_active: bool,
}

impl BaseEntity {
    /// Base column names in storage order.
    pub const COLUMNS: [&'static str; 5] = [
        "id",
        "created_date",
        "updated_date",
        "updated_by",
        "is_active",
    ];

    /// An unassigned, active base stamped with the current time.
    ///
    /// Timestamps are truncated to microseconds so that a value read back
    /// from `PostgreSQL` compares equal to the one written.
    pub fn new(updated_by: impl Into<String>) -> Self {
        let now = Utc::now().trunc_subsecs(TIMESTAMP_PRECISION_DIGITS);
        Self {
            id: EntityId::UNASSIGNED,
            created_date: now,
            updated_date: now,
            updated_by: updated_by.into(),
            is_active: true,
        }
    }

    fn push_columns(&self, record: &mut Record) {
        record.push("id", self.id);
        record.push("created_date", self.created_date);
        record.push("updated_date", self.updated_date);
        record.push("updated_by", self.updated_by.as_str());
        record.push("is_active", self.is_active);
    }
}

impl<'r> FromRow<'r, PgRow> for BaseEntity {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: EntityId::new(row.try_get("id")?),
            created_date: row.try_get("created_date")?,
            updated_date: row.try_get("updated_date")?,
            updated_by: row.try_get("updated_by")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

/// A type the repository can persist.
///
/// Implementors embed a [`BaseEntity`] and list their own columns in
/// [`Entity::columns`]; the base columns are added automatically.
pub trait Entity: for<'r> FromRow<'r, PgRow> + Clone + Send + Sync + Unpin + 'static {
    /// Table the type is stored in. Must be a plain SQL identifier.
    const TABLE: &'static str;

    /// Names of the type's own columns, in the order [`Entity::columns`]
    /// returns them.
    const COLUMNS: &'static [&'static str];

    /// Shared base columns.
    fn base(&self) -> &BaseEntity;

    /// Mutable access to the base columns.
    fn base_mut(&mut self) -> &mut BaseEntity;

    /// The type's own columns, excluding the base ones, in storage order.
    fn columns(&self) -> Vec<(&'static str, Value)>;

    /// Whether `column` is a base column or one of [`Entity::COLUMNS`].
    fn has_column(column: &str) -> bool {
        BaseEntity::COLUMNS.contains(&column) || Self::COLUMNS.contains(&column)
    }

    /// Shortcut for `self.base().id`.
    fn id(&self) -> EntityId {
        self.base().id
    }

    /// Snapshot of every column, base columns first.
    fn record(&self) -> Record {
        let own = self.columns();
        let mut record = Record::with_capacity(BaseEntity::COLUMNS.len().saturating_add(own.len()));
        self.base().push_columns(&mut record);
        for (column, value) in own {
            record.push(column, value);
        }
        record
    }
}

/// Type-erased view of an [`Entity`] held by a change tracker.
///
/// Implemented for every [`Entity`]; storage engines use it to read a
/// tracked snapshot without knowing its concrete type.
pub trait TrackedObject: Send + Sync {
    /// Table of the underlying entity.
    fn table_name(&self) -> &'static str;

    /// Identity of the underlying entity.
    fn tracked_id(&self) -> EntityId;

    /// Column snapshot of the underlying entity.
    fn snapshot(&self) -> Record;

    /// Record the identity assigned by an insert.
    fn assign_id(&mut self, id: EntityId);

    /// Clone into a new box.
    fn clone_boxed(&self) -> Box<dyn TrackedObject>;

    /// Access the concrete entity for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Entity> TrackedObject for T {
    fn table_name(&self) -> &'static str {
        T::TABLE
    }

    fn tracked_id(&self) -> EntityId {
        self.base().id
    }

    fn snapshot(&self) -> Record {
        self.record()
    }

    fn assign_id(&mut self, id: EntityId) {
        self.base_mut().id = id;
    }

    fn clone_boxed(&self) -> Box<dyn TrackedObject> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Widget;

    #[test]
    fn record_lists_base_columns_first() {
        let widget = Widget::new("gear", Some("spare"));
        let record = widget.record();

        let columns: Vec<_> = record.columns().collect();
        assert_eq!(
            columns,
            vec![
                "id",
                "created_date",
                "updated_date",
                "updated_by",
                "is_active",
                "name",
                "description"
            ]
        );
        assert_eq!(record.get("id"), Some(&Value::BigInt(0)));
        assert_eq!(record.get("is_active"), Some(&Value::Bool(true)));
    }

    #[test]
    fn declared_columns_match_the_record() {
        let record = Widget::new("gear", None).record();
        assert!(record.columns().all(Widget::has_column));
        assert!(Widget::has_column("is_active"));
        assert!(!Widget::has_column("colour"));
    }

    #[test]
    fn erased_view_assigns_ids_and_downcasts() {
        let mut boxed: Box<dyn TrackedObject> = Box::new(Widget::new("gear", None));
        boxed.assign_id(EntityId::new(9));

        assert_eq!(boxed.table_name(), "widgets");
        let widget = boxed.as_any().downcast_ref::<Widget>();
        assert_eq!(widget.map(|w| w.base.id), Some(EntityId::new(9)));
    }

    #[test]
    fn new_base_is_unassigned_and_active() {
        let base = BaseEntity::new("tester");
        assert!(!base.id.is_assigned());
        assert!(base.is_active);
        assert_eq!(base.created_date, base.updated_date);
        assert_eq!(base.created_date.timestamp_subsec_nanos() % 1_000, 0);
    }
}
