//! Tracking states an entity passes through before a flush.
//!
//! The state belongs to the session that tracks the entity, not to the
//! entity itself: the same value can be attached under different states
//! across operations.

use serde::{Deserialize, Serialize};

/// What a session intends to do with a tracked entity on the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Not tracked by the session.
    Detached,
    /// Will be inserted; the database assigns its id.
    PendingInsert,
    /// Will overwrite the row with the same id.
    PendingUpdate,
    /// Will remove the row with the same id.
    PendingDelete,
    /// Tracked and in sync with the database after a flush.
    Unchanged,
}

impl EntityState {
    /// Whether a flush has work to do for an entity in this state.
    pub const fn is_pending(self) -> bool {
        matches!(
            self,
            Self::PendingInsert | Self::PendingUpdate | Self::PendingDelete
        )
    }
}

impl core::fmt::Display for EntityState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Detached => "detached",
            Self::PendingInsert => "pending insert",
            Self::PendingUpdate => "pending update",
            Self::PendingDelete => "pending delete",
            Self::Unchanged => "unchanged",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_write_states_are_pending() {
        assert!(EntityState::PendingInsert.is_pending());
        assert!(EntityState::PendingUpdate.is_pending());
        assert!(EntityState::PendingDelete.is_pending());
        assert!(!EntityState::Unchanged.is_pending());
        assert!(!EntityState::Detached.is_pending());
    }
}
