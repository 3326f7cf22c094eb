//! Schema migrations for test databases.
//!
//! Applying migrations has three parts: the versioned migrations in
//! `migrations/`, the auxiliary views and triggers in the sibling
//! `views_and_triggers/` directory (rebuilt from scratch after every forward
//! run in the `harness_code` schema), and the auth token keypair seed row.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use intg_core::HarnessConfig;
use intg_errors::{HarnessError, HarnessResult};
use sqlx::PgPool;
use tracing::{debug, error, info, instrument};

use super::auth_keys::{AuthKeyInitializer, PgAuthKeyInitializer};
use super::lock::MigrationLockCoordinator;

/// Schema holding everything from `views_and_triggers/`.
pub const CODE_SCHEMA: &str = "harness_code";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAction {
    Up,
    /// Revert the most recently applied migration.
    Down,
    /// Revert every migration newer than the given version.
    DownTo(i64),
}

impl fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationAction::Up => write!(f, "up"),
            MigrationAction::Down => write!(f, "down"),
            MigrationAction::DownTo(version) => write!(f, "down {version}"),
        }
    }
}

impl FromStr for MigrationAction {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let action = match (parts.next(), parts.next()) {
            (Some(cmd), None) if cmd.eq_ignore_ascii_case("up") => MigrationAction::Up,
            (Some(cmd), None) if cmd.eq_ignore_ascii_case("down") => MigrationAction::Down,
            (Some(cmd), Some(version)) if cmd.eq_ignore_ascii_case("down") => {
                let version = version.parse().map_err(|_| {
                    HarnessError::validation_error(format!("invalid migration version: {version}"))
                })?;
                MigrationAction::DownTo(version)
            }
            _ => {
                return Err(HarnessError::validation_error(format!(
                    "unknown migration action: {s:?}"
                )))
            }
        };
        if parts.next().is_some() {
            return Err(HarnessError::validation_error(format!(
                "unknown migration action: {s:?}"
            )));
        }
        Ok(action)
    }
}

fn describe_actions(actions: &[MigrationAction]) -> String {
    actions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPaths {
    pub migrations: PathBuf,
    pub views_and_triggers: PathBuf,
}

impl MigrationPaths {
    /// Accepts a plain path or a `file://` URL.
    pub fn from_migrations(path: &str) -> Self {
        let migrations = PathBuf::from(path.strip_prefix("file://").unwrap_or(path));
        let views_and_triggers = migrations.join("..").join("views_and_triggers");
        Self {
            migrations,
            views_and_triggers,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    async fn apply(
        &self,
        pool: &PgPool,
        paths: &MigrationPaths,
        actions: &[MigrationAction],
    ) -> HarnessResult<()>;
}

/// Runs reversible sqlx migrations from a directory at runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxMigrationEngine;

impl SqlxMigrationEngine {
    async fn previous_version(pool: &PgPool) -> HarnessResult<i64> {
        let has_table: bool =
            sqlx::query_scalar("SELECT to_regclass('_sqlx_migrations') IS NOT NULL")
                .fetch_one(pool)
                .await?;
        if !has_table {
            return Ok(0);
        }
        let previous: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM _sqlx_migrations WHERE success ORDER BY version DESC OFFSET 1 LIMIT 1",
        )
        .fetch_optional(pool)
        .await?;
        Ok(previous.unwrap_or(0))
    }

    async fn apply_views_and_triggers(pool: &PgPool, dir: &Path) -> HarnessResult<()> {
        sqlx::query(&format!("CREATE SCHEMA {CODE_SCHEMA}"))
            .execute(pool)
            .await?;

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "no views and triggers to apply");
                return Ok(());
            }
            Err(e) => {
                return Err(HarnessError::Migration {
                    path: dir.display().to_string(),
                    direction: MigrationAction::Up.to_string(),
                    message: format!("failed to list views and triggers: {e}"),
                })
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| HarnessError::Migration {
            path: dir.display().to_string(),
            direction: MigrationAction::Up.to_string(),
            message: format!("failed to list views and triggers: {e}"),
        })? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "sql") {
                files.push(path);
            }
        }
        files.sort();

        for file in files {
            let sql = tokio::fs::read_to_string(&file).await.map_err(|e| HarnessError::Migration {
                path: file.display().to_string(),
                direction: MigrationAction::Up.to_string(),
                message: format!("failed to read: {e}"),
            })?;
            sqlx::raw_sql(&sql)
                .execute(pool)
                .await
                .map_err(|e| HarnessError::Migration {
                    path: file.display().to_string(),
                    direction: MigrationAction::Up.to_string(),
                    message: e.to_string(),
                })?;
            debug!(file = %file.display(), "applied views and triggers file");
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationEngine for SqlxMigrationEngine {
    async fn apply(
        &self,
        pool: &PgPool,
        paths: &MigrationPaths,
        actions: &[MigrationAction],
    ) -> HarnessResult<()> {
        let migration_error = |action: &MigrationAction, message: String| HarnessError::Migration {
            path: paths.migrations.display().to_string(),
            direction: action.to_string(),
            message,
        };

        let migrator = sqlx::migrate::Migrator::new(paths.migrations.as_path())
            .await
            .map_err(|e| HarnessError::Migration {
                path: paths.migrations.display().to_string(),
                direction: describe_actions(actions),
                message: format!("failed to load migrations: {e}"),
            })?;

        // Views depend on the tables, so they go first and come back last.
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {CODE_SCHEMA} CASCADE"))
            .execute(pool)
            .await?;

        for action in actions {
            let result = match action {
                MigrationAction::Up => migrator.run(pool).await,
                MigrationAction::Down => {
                    let target = Self::previous_version(pool).await?;
                    migrator.undo(pool, target).await
                }
                MigrationAction::DownTo(version) => migrator.undo(pool, *version).await,
            };
            result.map_err(|e| migration_error(action, e.to_string()))?;
            debug!(%action, "applied migration action");
        }

        if actions.last() == Some(&MigrationAction::Up) {
            Self::apply_views_and_triggers(pool, &paths.views_and_triggers).await?;
        }
        Ok(())
    }
}

/// Migration entry point used by the resolver and the provisioner.
#[derive(Clone)]
pub struct Migrator {
    engine: Arc<dyn MigrationEngine>,
    auth_keys: Arc<dyn AuthKeyInitializer>,
    coordinator: MigrationLockCoordinator,
}

impl Migrator {
    pub fn new(
        engine: Arc<dyn MigrationEngine>,
        auth_keys: Arc<dyn AuthKeyInitializer>,
        coordinator: MigrationLockCoordinator,
    ) -> Self {
        Self {
            engine,
            auth_keys,
            coordinator,
        }
    }

    pub fn for_config(config: &HarnessConfig) -> Self {
        Self::new(
            Arc::new(SqlxMigrationEngine),
            Arc::new(PgAuthKeyInitializer::default()),
            MigrationLockCoordinator::advisory(config.migration_lock_id),
        )
    }

    pub fn with_engine(mut self, engine: Arc<dyn MigrationEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_auth_keys(mut self, auth_keys: Arc<dyn AuthKeyInitializer>) -> Self {
        self.auth_keys = auth_keys;
        self
    }

    pub fn with_coordinator(mut self, coordinator: MigrationLockCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Apply `actions` (default: `[Up]`). A run that ends migrated forward
    /// then seeds the auth keys.
    #[instrument(skip(self, pool))]
    pub async fn migrate(
        &self,
        pool: &PgPool,
        migrations_path: &str,
        actions: &[MigrationAction],
    ) -> HarnessResult<()> {
        let actions = if actions.is_empty() {
            &[MigrationAction::Up][..]
        } else {
            actions
        };
        let paths = MigrationPaths::from_migrations(migrations_path);

        self.engine
            .apply(pool, &paths, actions)
            .await
            .map_err(|e| match e {
                e @ HarnessError::Migration { .. } => e,
                other => HarnessError::Migration {
                    path: migrations_path.to_string(),
                    direction: describe_actions(actions),
                    message: other.to_string(),
                },
            })?;

        if actions.last() == Some(&MigrationAction::Up) {
            self.auth_keys.init_auth_keys(pool).await?;
        }
        info!(direction = %describe_actions(actions), "migrated test database");
        Ok(())
    }

    /// [`migrate`](Self::migrate) while holding the migration lock.
    ///
    /// # Panics
    ///
    /// If the lock cannot be acquired or released. A migration error that
    /// would be lost to a failed release is logged first.
    pub async fn migrate_locked(
        &self,
        pool: &PgPool,
        migrations_path: &str,
        actions: &[MigrationAction],
    ) -> HarnessResult<()> {
        let guard = self.coordinator.lock(pool).await;
        let migrated = self.migrate(pool, migrations_path, actions).await;
        if let Err(release) = guard.try_unlock().await {
            if let Err(e) = &migrated {
                error!(error = %e, "migration failed before the migration lock was released");
            }
            panic!("error releasing migration lock: {release}");
        }
        migrated
    }
}
