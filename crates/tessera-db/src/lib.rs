//! Entity repository for `PostgreSQL`: change tracking, chunked batch
//! writes and soft-delete deactivation.
//!
//! A [`Repository`] drives a [`PersistenceContext`], which owns one session:
//! a [`ChangeTracker`] plus the storage it flushes to. Each write clears the
//! tracker, attaches the entities under the intended state and flushes them
//! as one unit of work. Batch writes do this once per chunk.
//!
//! # Architecture
//!
//! ```text
//! Repository (async)  <--  BlockingRepository (owns a runtime)
//!     |
//!     +-- clear / attach --> ChangeTracker
//!     |
//!     +-- flush / fetch ---> PersistenceContext
//!                              |-- PgContext        (one transaction per flush)
//!                              +-- InMemoryContext  (tests, local runs)
//! ```
//!
//! # Modules
//!
//! - [`entity`] -- `BaseEntity` and the `Entity` trait
//! - [`tracker`] -- per-session change tracking
//! - [`context`] -- the persistence context contract
//! - [`query`] -- lazy, composable reads
//! - [`repository`] -- CRUD, batch and deactivate operations
//! - [`blocking`] -- synchronous front end
//! - [`postgres`] / [`pg_context`] -- `PostgreSQL` pool and session
//! - [`memory`] -- in-memory session
//! - [`sql`] -- statement rendering
//! - [`config`] -- YAML configuration
//! - [`error`] -- shared error type

pub mod blocking;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod memory;
pub mod pg_context;
pub mod postgres;
pub mod query;
pub mod repository;
pub mod sql;
pub mod tracker;

#[cfg(test)]
mod test_support;

// Re-export primary types for convenience.
pub use blocking::BlockingRepository;
pub use config::{BatchingConfig, ConfigError, DatabaseConfig, LogFormat, LoggingConfig, TesseraConfig};
pub use context::{DEFAULT_COMMAND_TIMEOUT, FlushReport, PersistenceContext};
pub use entity::{BaseEntity, Entity, TrackedObject};
pub use error::DbError;
pub use memory::InMemoryContext;
pub use pg_context::PgContext;
pub use postgres::{PostgresConfig, PostgresPool};
pub use query::Query;
pub use repository::Repository;
pub use tracker::{ChangeTracker, TrackedEntry};
