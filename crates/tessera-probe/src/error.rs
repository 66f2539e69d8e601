//! Error types for the probe.

use tessera_db::{ConfigError, DbError};

/// Errors that can stop a probe run.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The configuration file could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A repository operation failed.
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// The database answered, but not with what the lifecycle expects.
    #[error("check failed: {0}")]
    Check(String),
}
