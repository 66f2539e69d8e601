//! Shared type definitions for the Tessera persistence layer.
//!
//! This crate holds the storage-agnostic vocabulary used by `tessera-db`:
//! identifiers, tracking states, column values, row snapshots, and the
//! portable filter tree handed to the query engine. Nothing here performs
//! I/O.
//!
//! # Modules
//!
//! - [`ids`] -- The database-assigned entity identity
//! - [`state`] -- Tracking states an entity passes through before a flush
//! - [`value`] -- Column values bound into statements or compared in memory
//! - [`record`] -- Ordered column/value snapshots of a single row
//! - [`filter`] -- Serializable predicate tree and sort order

pub mod filter;
pub mod ids;
pub mod record;
pub mod state;
pub mod value;

// Re-export all public types at crate root for convenience.
pub use filter::{CompareOp, Filter, FilterError, SortOrder, is_valid_identifier};
pub use ids::EntityId;
pub use record::Record;
pub use state::EntityState;
pub use value::Value;
