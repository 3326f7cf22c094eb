//! Postgres fixtures for integration tests.
//!
//! A test either provisions its own throwaway database or attaches to the
//! shared one named by `INTEGRATION_POSTGRES_URL`, migrates it, and then
//! builds the rows it needs through [`Fixtures`] in dependency order.
//!
//! ```no_run
//! # async fn run() -> intg_harness::HarnessResult<()> {
//! use intg_harness::prelude::*;
//!
//! let config = HarnessConfig::from_env()?;
//! let (db, fixtures) = intg_harness::ephemeral_fixtures(&config).await?;
//! let alice = fixtures.create_user(UserOptions::named("alice")).await?;
//! let experiment = fixtures.create_experiment(&alice, ExperimentOptions::default()).await?;
//! assert_eq!(experiment.owner_id, Some(alice.id));
//! db.cleanup().await;
//! # Ok(())
//! # }
//! ```

pub use intg_core as core;
pub use intg_domain as domain;
pub use intg_errors::{HarnessError, HarnessResult};
pub use intg_infrastructure as infrastructure;

use intg_core::HarnessConfig;
use intg_infrastructure::{EphemeralDatabase, EphemeralDatabaseProvisioner, Fixtures, MigrationAction};

pub mod prelude {
    pub use intg_core::{init_test_logging, HarnessConfig, RandomSource};
    pub use intg_domain::{
        Allocation, Checkpoint, Experiment, Job, MetricGroup, Project, State, Task, Trial,
        TrialMetrics, User, Workspace,
    };
    pub use intg_errors::{HarnessError, HarnessResult};
    pub use intg_infrastructure::{
        resolve_test_postgres, setup_test_postgres, AllocationOptions, CheckpointOptions,
        EphemeralDatabase, EphemeralDatabaseProvisioner, ExperimentOptions, Fixtures,
        MigrationAction, MigrationLockCoordinator, Migrator, TrialOptions, UserOptions,
    };
}

/// Provision and migrate a throwaway database, with fixtures bound to it.
///
/// The caller owns the database and must call [`EphemeralDatabase::cleanup`].
pub async fn ephemeral_fixtures(config: &HarnessConfig) -> HarnessResult<(EphemeralDatabase, Fixtures)> {
    let db = EphemeralDatabaseProvisioner::new(config.clone())
        .provision_migrated(&[MigrationAction::Up])
        .await?;
    let fixtures = Fixtures::with_config(db.pool().clone(), config);
    Ok((db, fixtures))
}
