//! Connections to the externally configured, long-lived test database.

use intg_core::HarnessConfig;
use intg_errors::{HarnessError, HarnessResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};
use url::Url;

use super::migrate::{MigrationAction, Migrator};

/// Open a pool against `url`, sized and timed out per `config`.
pub async fn connect_postgres(url: &str, config: &HarnessConfig) -> HarnessResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .connect(url)
        .await
        .map_err(|e| {
            HarnessError::connection(
                format!("failed to connect to postgres at {}", redact_url(url)),
                e,
            )
        })
}

/// The connection string with any password replaced, for logs and errors.
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparsable url>".to_string(),
    }
}

/// A pool on the shared test database. The caller owns it exclusively;
/// [`SharedDatabase::close`] is its teardown.
#[derive(Debug, Clone)]
pub struct SharedDatabase {
    pool: PgPool,
}

impl SharedDatabase {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
        debug!("closed shared test database pool");
    }
}

/// Connect to the database named by the configured connection string.
pub async fn resolve_test_postgres(config: &HarnessConfig) -> HarnessResult<SharedDatabase> {
    let url = config.require_postgres_url()?;
    let pool = connect_postgres(url, config).await?;
    info!(url = %redact_url(url), "resolved shared test database");
    Ok(SharedDatabase { pool })
}

/// Resolve the shared database and apply migrations under the migration lock.
///
/// # Panics
///
/// If the migration lock cannot be acquired or released.
pub async fn setup_test_postgres(config: &HarnessConfig) -> HarnessResult<SharedDatabase> {
    let db = resolve_test_postgres(config).await?;
    let migrator = Migrator::for_config(config);
    if let Err(e) = migrator
        .migrate_locked(db.pool(), &config.migrations_path, &[MigrationAction::Up])
        .await
    {
        db.close().await;
        return Err(e);
    }
    Ok(db)
}
