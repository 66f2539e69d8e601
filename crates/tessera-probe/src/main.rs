//! Lifecycle probe for the Tessera repository.
//!
//! Loads `tessera.yaml` (or the file named by `TESSERA_CONFIG`), connects to
//! `PostgreSQL`, and runs one insert / update / deactivate / delete cycle
//! against a scratch table. Exits non-zero if any step fails or reads back
//! something unexpected.

mod error;
mod probe;

use std::path::PathBuf;

use tessera_db::{LogFormat, LoggingConfig, PostgresPool, Repository, TesseraConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Config file used when `TESSERA_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "tessera.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, connection or any probe step fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::var("TESSERA_CONFIG")
        .map_or_else(|_unset| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = if path.exists() {
        TesseraConfig::from_file(&path)?
    } else {
        let mut config = TesseraConfig::default();
        config.database.apply_env_overrides();
        config
    };

    init_tracing(&config.logging);
    info!(config = %path.display(), "tessera-probe starting");

    let pool = PostgresPool::connect(&config.database.to_postgres_config()).await?;
    probe::ensure_table(&pool).await?;

    let mut repo = Repository::with_batching(pool.context().await?, config.batching);
    let outcome = probe::run(&mut repo).await;
    drop(repo);
    pool.close().await;

    let report = outcome?;
    info!(
        tag = report.tag,
        inserted = report.inserted,
        deactivated = report.deactivated,
        deleted = report.deleted,
        "Probe completed"
    );
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
