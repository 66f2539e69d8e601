//! The database-assigned entity identity.
//!
//! Every persisted row is identified by a 64-bit integer drawn from the
//! table's identity column. Two in-memory values carrying the same
//! [`EntityId`] refer to the same row. Before the first insert the id is
//! [`EntityId::UNASSIGNED`].

use serde::{Deserialize, Serialize};

/// Identity of a persisted row.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl EntityId {
    /// The id carried by an entity that has not been inserted yet.
    pub const UNASSIGNED: Self = Self(0);

    /// Wrap a raw identity value.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Whether the database has assigned this id (identity columns start at 1).
    pub const fn is_assigned(self) -> bool {
        self.0 > 0
    }

    /// Return the inner `i64` value.
    pub const fn into_inner(self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for EntityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntityId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<EntityId> for i64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_until_positive() {
        assert!(!EntityId::UNASSIGNED.is_assigned());
        assert!(!EntityId::new(-4).is_assigned());
        assert!(EntityId::new(1).is_assigned());
    }

    #[test]
    fn serializes_as_bare_integer() {
        let json = serde_json::to_string(&EntityId::new(42)).ok();
        assert_eq!(json.as_deref(), Some("42"));
    }
}
