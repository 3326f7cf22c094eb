//! Harness configuration.
//!
//! Values are layered: built-in defaults, then an optional `intg-harness`
//! config file in the working directory, then `INTEGRATION_*` environment
//! variables. The base connection string is `INTEGRATION_POSTGRES_URL`.

use std::collections::HashMap;
use std::time::Duration;

use intg_errors::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};

/// Environment variable holding the shared test database connection string.
pub const POSTGRES_URL_ENV: &str = "INTEGRATION_POSTGRES_URL";

/// Project used by experiment fixtures when no project is given.
pub const DEFAULT_PROJECT_ID: i32 = 1;

/// Searcher metric of the default experiment configuration.
pub const DEFAULT_SEARCHER_METRIC: &str = "okness";

/// Advisory lock key serialising migrations on a shared database. Chosen arbitrarily.
pub const MIGRATION_LOCK_ID: i64 = 0x33ad0708c9bed25b;

pub const DEFAULT_MIGRATIONS_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../migrations");

pub const DEFAULT_MODEL_DEFINITION_PATH: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/../../testdata/model_def");

const ENV_PREFIX: &str = "INTEGRATION";
const CONFIG_FILE: &str = "intg-harness";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Base connection string; `None` when the environment does not supply one.
    pub postgres_url: Option<String>,
    pub max_connections: u32,
    /// How long a connect may keep retrying before it fails.
    pub connect_timeout_seconds: u64,
    pub migrations_path: String,
    pub model_definition_path: String,
    pub default_project_id: i32,
    pub default_searcher_metric: String,
    pub migration_lock_id: i64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            max_connections: 5,
            connect_timeout_seconds: 30,
            migrations_path: DEFAULT_MIGRATIONS_PATH.to_string(),
            model_definition_path: DEFAULT_MODEL_DEFINITION_PATH.to_string(),
            default_project_id: DEFAULT_PROJECT_ID,
            default_searcher_metric: DEFAULT_SEARCHER_METRIC.to_string(),
            migration_lock_id: MIGRATION_LOCK_ID,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> HarnessResult<Self> {
        Self::load(None)
    }

    /// Load configuration from an explicit set of `INTEGRATION_*` variables
    /// instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> HarnessResult<Self> {
        Self::load(Some(vars))
    }

    fn load(vars: Option<HashMap<String, String>>) -> HarnessResult<Self> {
        let defaults = Self::default();
        let built = config::Config::builder()
            .set_default("max_connections", i64::from(defaults.max_connections))
            .and_then(|b| {
                b.set_default(
                    "connect_timeout_seconds",
                    defaults.connect_timeout_seconds,
                )
            })
            .and_then(|b| b.set_default("migrations_path", defaults.migrations_path))
            .and_then(|b| b.set_default("model_definition_path", defaults.model_definition_path))
            .and_then(|b| b.set_default("default_project_id", i64::from(defaults.default_project_id)))
            .and_then(|b| b.set_default("default_searcher_metric", defaults.default_searcher_metric))
            .and_then(|b| b.set_default("migration_lock_id", defaults.migration_lock_id))
            .map_err(|e| HarnessError::config_error(e.to_string()))?
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .map_err(|e| HarnessError::config_error(e.to_string()))?;

        let mut loaded: HarnessConfig = built
            .try_deserialize()
            .map_err(|e| HarnessError::config_error(e.to_string()))?;
        if loaded.postgres_url.as_deref().is_some_and(|url| url.trim().is_empty()) {
            loaded.postgres_url = None;
        }
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn with_postgres_url(mut self, url: impl Into<String>) -> Self {
        self.postgres_url = Some(url.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// The base connection string, or a configuration error naming the variable.
    pub fn require_postgres_url(&self) -> HarnessResult<&str> {
        self.postgres_url
            .as_deref()
            .ok_or_else(|| HarnessError::config_error(format!("no {POSTGRES_URL_ENV} detected")))
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if let Some(url) = &self.postgres_url {
            if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                return Err(HarnessError::config_error(format!(
                    "{POSTGRES_URL_ENV} must start with postgresql:// or postgres://"
                )));
            }
        }
        // The migration lock pins one connection while migrations use another.
        if self.max_connections < 2 {
            return Err(HarnessError::config_error(
                "max_connections must be at least 2",
            ));
        }
        if self.connect_timeout_seconds == 0 {
            return Err(HarnessError::config_error(
                "connect_timeout_seconds must be greater than 0",
            ));
        }
        if self.migrations_path.is_empty() {
            return Err(HarnessError::config_error("migrations_path must not be empty"));
        }
        if self.default_searcher_metric.is_empty() {
            return Err(HarnessError::config_error(
                "default_searcher_metric must not be empty",
            ));
        }
        Ok(())
    }
}
