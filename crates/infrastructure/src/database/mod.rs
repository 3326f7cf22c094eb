pub mod auth_keys;
pub mod lock;
pub mod migrate;
pub mod provisioner;
pub mod resolver;

pub use auth_keys::{AuthKeyInitializer, PgAuthKeyInitializer};
pub use lock::{
    AdvisoryLockStrategy, LockHandle, LockStrategy, MigrationGuard, MigrationLockCoordinator,
    NoopLockStrategy,
};
pub use migrate::{MigrationAction, MigrationEngine, MigrationPaths, Migrator, SqlxMigrationEngine};
pub use provisioner::{EphemeralDatabase, EphemeralDatabaseProvisioner, EPHEMERAL_DATABASE_PREFIX};
pub use resolver::{connect_postgres, redact_url, resolve_test_postgres, setup_test_postgres, SharedDatabase};
