//! Dependency-ordered fixture rows.
//!
//! Every builder takes handles to the entities its row references, so the
//! insertion order follows from the signatures: a trial needs a [`Task`],
//! a task needs a [`Job`], and so on. Builders insert through the pool one
//! statement at a time and never open a transaction of their own; callers
//! that need atomicity across several builders compose it themselves.
//!
//! [`Task`]: intg_domain::Task
//! [`Job`]: intg_domain::Job

mod allocations;
mod checkpoints;
mod experiments;
mod jobs;
mod metrics;
mod trials;
mod users;
mod workspaces;

use std::sync::Arc;

use intg_core::{hex_encode, random_bytes, HarnessConfig, OsRandomSource, RandomSource};
use intg_errors::{HarnessError, HarnessResult};
use sqlx::PgPool;

pub use allocations::{apply_allocation_options, AllocationOptions};
pub use checkpoints::{mock_checkpoint, CheckpointOptions, TrialCheckpoint};
pub use experiments::{mock_experiment_config, ExperimentOptions};
pub use trials::{apply_trial_options, TrialOptions};
pub use users::{apply_user_options, UserOptions};

/// Values builders fall back on when an override is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureDefaults {
    pub project_id: i32,
    pub searcher_metric: String,
    pub model_definition_path: String,
}

impl From<&HarnessConfig> for FixtureDefaults {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            project_id: config.default_project_id,
            searcher_metric: config.default_searcher_metric.clone(),
            model_definition_path: config.model_definition_path.clone(),
        }
    }
}

impl Default for FixtureDefaults {
    fn default() -> Self {
        Self::from(&HarnessConfig::default())
    }
}

#[derive(Clone)]
pub struct Fixtures {
    pool: PgPool,
    defaults: FixtureDefaults,
    random: Arc<dyn RandomSource>,
}

impl Fixtures {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            defaults: FixtureDefaults::default(),
            random: Arc::new(OsRandomSource),
        }
    }

    pub fn with_config(pool: PgPool, config: &HarnessConfig) -> Self {
        Self {
            defaults: FixtureDefaults::from(config),
            ..Self::new(pool)
        }
    }

    pub fn with_random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn defaults(&self) -> &FixtureDefaults {
        &self.defaults
    }

    /// Run a raw statement, returning the number of affected rows.
    pub async fn exec(&self, sql: &str) -> HarnessResult<u64> {
        let result = sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// A short random name, unique enough to never collide across tests.
    pub(crate) fn random_name(&self, prefix: &str) -> String {
        let suffix: [u8; 8] = random_bytes(self.random.as_ref());
        format!("{prefix}-{}", hex_encode(&suffix))
    }

    pub(crate) fn random(&self) -> &dyn RandomSource {
        self.random.as_ref()
    }
}

pub(crate) fn insertion(entity: &'static str) -> impl FnOnce(sqlx::Error) -> HarnessError {
    move |source| HarnessError::insertion(entity, source)
}
