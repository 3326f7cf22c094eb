//! Throwaway databases, one per test run.
//!
//! [`EphemeralDatabaseProvisioner::provision`] creates a database named
//! `intg-<32 hex chars>` on the configured server and connects to it. The
//! returned [`EphemeralDatabase`] is exclusively owned by the caller and must
//! be handed back through [`EphemeralDatabase::cleanup`], which closes the
//! pool and then drops the database.

use std::sync::Arc;

use intg_core::{hex_encode, random_bytes, HarnessConfig, OsRandomSource, RandomSource, POSTGRES_URL_ENV};
use intg_errors::{HarnessError, HarnessResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};
use url::Url;

use super::lock::{MigrationLockCoordinator, NoopLockStrategy};
use super::migrate::{MigrationAction, Migrator};
use super::resolver::{connect_postgres, redact_url};

pub const EPHEMERAL_DATABASE_PREFIX: &str = "intg-";

/// Random bytes in every generated database name.
const NAME_SUFFIX_BYTES: usize = 16;

pub struct EphemeralDatabaseProvisioner {
    config: HarnessConfig,
    random: Arc<dyn RandomSource>,
}

impl EphemeralDatabaseProvisioner {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            random: Arc::new(OsRandomSource),
        }
    }

    pub fn with_random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn generate_name(&self) -> String {
        let suffix: [u8; NAME_SUFFIX_BYTES] = random_bytes(self.random.as_ref());
        format!("{EPHEMERAL_DATABASE_PREFIX}{}", hex_encode(&suffix))
    }

    /// Create a fresh database and return a live connection to it.
    #[instrument(skip(self))]
    pub async fn provision(&self) -> HarnessResult<EphemeralDatabase> {
        let base_url = self.config.require_postgres_url()?;
        let mut url = Url::parse(base_url).map_err(|e| {
            HarnessError::provisioning(
                "",
                format!(
                    "failed to parse {POSTGRES_URL_ENV} ({}): {e}",
                    redact_url(base_url)
                ),
            )
        })?;

        // Connect to the server itself, without selecting a database.
        url.set_path("");
        let server = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.config.connect_timeout())
            .connect(url.as_str())
            .await
            .map_err(|e| {
                HarnessError::provisioning(
                    "",
                    format!("failed to connect to postgres at {}: {e}", redact_url(url.as_str())),
                )
            })?;

        let name = self.generate_name();
        let create = format!("CREATE DATABASE {}", quote_identifier(&name));
        if let Err(e) = sqlx::query(&create).execute(&server).await {
            server.close().await;
            return Err(HarnessError::provisioning(
                &name,
                format!("failed to create new database: {e}"),
            ));
        }

        url.set_path(&format!("/{name}"));
        let url = url.to_string();
        let pool = match connect_postgres(&url, &self.config).await {
            Ok(pool) => pool,
            Err(e) => {
                drop_database(&server, &name).await;
                server.close().await;
                return Err(HarnessError::provisioning(
                    name,
                    format!("failed to connect to new database: {e}"),
                ));
            }
        };

        info!(database = %name, "created ephemeral database");
        Ok(EphemeralDatabase {
            name,
            url,
            pool,
            server,
            cleaned_up: false,
        })
    }

    /// Provision a database and apply migrations to it.
    ///
    /// The database is exclusively owned, so migrations run without the
    /// shared-database lock. On migration failure the database is dropped
    /// before the error is returned.
    pub async fn provision_migrated(&self, actions: &[MigrationAction]) -> HarnessResult<EphemeralDatabase> {
        let migrator = Migrator::for_config(&self.config)
            .with_coordinator(MigrationLockCoordinator::new(Arc::new(NoopLockStrategy)));
        self.provision_with(&migrator, actions).await
    }

    /// Like [`provision_migrated`](Self::provision_migrated) with a caller-built
    /// migrator. Panics if the migrator's lock cannot be acquired or released.
    pub async fn provision_with(
        &self,
        migrator: &Migrator,
        actions: &[MigrationAction],
    ) -> HarnessResult<EphemeralDatabase> {
        let database = self.provision().await?;
        if let Err(e) = migrator
            .migrate_locked(database.pool(), &self.config.migrations_path, actions)
            .await
        {
            database.cleanup().await;
            return Err(e);
        }
        Ok(database)
    }
}

/// A database created by [`EphemeralDatabaseProvisioner`].
///
/// Holds a single-connection pool on the server so the database can be
/// dropped once the scoped pool is closed.
#[derive(Debug)]
pub struct EphemeralDatabase {
    name: String,
    url: String,
    pool: PgPool,
    server: PgPool,
    cleaned_up: bool,
}

impl EphemeralDatabase {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection string of this database, including credentials.
    pub fn connection_url(&self) -> &str {
        &self.url
    }

    /// Pool scoped to this database.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the scoped connection, then drop the database.
    ///
    /// Failures are logged and swallowed so a cleanup error never masks the
    /// failure of the test that is being torn down.
    pub async fn cleanup(mut self) {
        self.pool.close().await;
        drop_database(&self.server, &self.name).await;
        self.server.close().await;
        self.cleaned_up = true;
    }
}

impl Drop for EphemeralDatabase {
    fn drop(&mut self) {
        if !self.cleaned_up {
            warn!(
                database = %self.name,
                "ephemeral database dropped without cleanup; it will outlive the test"
            );
        }
    }
}

/// Drop `name` through the server pool, logging instead of failing.
///
/// `pool.close()` can return before the backend of its last session has
/// exited, so the drop forces out any session still attached (Postgres 13+).
async fn drop_database(server: &PgPool, name: &str) {
    let drop = format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_identifier(name));
    match sqlx::query(&drop).execute(server).await {
        Ok(_) => info!(database = %name, "dropped ephemeral database"),
        Err(e) => error!(database = %name, error = %e, "failed to delete temp database"),
    }
}

/// Double-quote an identifier for use in DDL.
pub(crate) fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
