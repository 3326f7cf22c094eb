//! Experiment configuration and its defaulting pass.
//!
//! A user-supplied [`ExperimentConfig`] leaves most fields unset.
//! [`ExperimentConfig::with_defaults`] fills every omitted field with its
//! schema default and is idempotent, so applying it to an already-defaulted
//! configuration returns an identical value (and identical JSON).

use std::collections::BTreeMap;

use intg_errors::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXPERIMENT_NAME: &str = "Experiment";
pub const DEFAULT_STORAGE_PATH: &str = "determined-checkpoint";
pub const DEFAULT_RESOURCE_POOL: &str = "default";
pub const DEFAULT_MAX_RESTARTS: u32 = 5;
pub const DEFAULT_SCHEDULING_UNIT: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_storage: Option<CheckpointStorageConfig>,
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, Hyperparameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searcher: Option<SearcherConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_unit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_per_epoch: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrations: Option<IntegrationsConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointStorageConfig {
    SharedFs {
        host_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        storage_path: Option<String>,
        #[serde(flatten)]
        retention: CheckpointRetention,
    },
    Directory {
        container_path: String,
        #[serde(flatten)]
        retention: CheckpointRetention,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRetention {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_experiment_best: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_trial_best: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_trial_latest: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hyperparameter {
    Const { val: serde_json::Value },
    Int { minval: i64, maxval: i64 },
    Double { minval: f64, maxval: f64 },
    Categorical { vals: Vec<serde_json::Value> },
}

impl Hyperparameter {
    pub fn constant(val: impl Into<serde_json::Value>) -> Self {
        Hyperparameter::Const { val: val.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearcherKind {
    Single,
    Random,
    Grid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearcherConfig {
    pub name: SearcherKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smaller_is_better: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_trials: Option<u32>,
}

impl SearcherConfig {
    pub fn single(metric: impl Into<String>) -> Self {
        Self {
            name: SearcherKind::Single,
            metric: Some(metric.into()),
            smaller_is_better: None,
            max_trials: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots_per_trial: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pachyderm: Option<PachydermIntegration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PachydermIntegration {
    pub host: String,
    pub port: u16,
    pub project: String,
    pub repo: String,
    pub commit: String,
}

/// The subset of a configuration older code paths read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyConfig {
    pub checkpoint_storage: CheckpointStorageConfig,
    pub hyperparameter_names: Vec<String>,
    pub searcher_metric: String,
    pub smaller_is_better: bool,
    pub max_restarts: u32,
}

impl CheckpointStorageConfig {
    fn with_defaults(&self) -> Self {
        match self {
            CheckpointStorageConfig::SharedFs {
                host_path,
                storage_path,
                retention,
            } => CheckpointStorageConfig::SharedFs {
                host_path: host_path.clone(),
                storage_path: Some(
                    storage_path
                        .clone()
                        .unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_string()),
                ),
                retention: retention.with_defaults(),
            },
            CheckpointStorageConfig::Directory {
                container_path,
                retention,
            } => CheckpointStorageConfig::Directory {
                container_path: container_path.clone(),
                retention: retention.with_defaults(),
            },
        }
    }
}

impl CheckpointRetention {
    fn with_defaults(&self) -> Self {
        Self {
            save_experiment_best: Some(self.save_experiment_best.unwrap_or(0)),
            save_trial_best: Some(self.save_trial_best.unwrap_or(1)),
            save_trial_latest: Some(self.save_trial_latest.unwrap_or(1)),
        }
    }
}

impl ExperimentConfig {
    /// Fill every omitted field with its default. Pure and idempotent.
    pub fn with_defaults(&self) -> Self {
        let checkpoint_storage = self
            .checkpoint_storage
            .clone()
            .unwrap_or_else(|| CheckpointStorageConfig::SharedFs {
                host_path: "/tmp".to_string(),
                storage_path: None,
                retention: CheckpointRetention::default(),
            })
            .with_defaults();

        let searcher = self.searcher.as_ref().map(|s| SearcherConfig {
            name: s.name,
            metric: s.metric.clone(),
            smaller_is_better: Some(s.smaller_is_better.unwrap_or(true)),
            max_trials: match s.name {
                SearcherKind::Single => Some(1),
                _ => s.max_trials,
            },
        });

        let resources = self.resources.clone().unwrap_or_default();
        let resources = ResourcesConfig {
            slots_per_trial: Some(resources.slots_per_trial.unwrap_or(1)),
            resource_pool: Some(
                resources
                    .resource_pool
                    .unwrap_or_else(|| DEFAULT_RESOURCE_POOL.to_string()),
            ),
            priority: resources.priority,
        };

        Self {
            name: Some(
                self.name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_EXPERIMENT_NAME.to_string()),
            ),
            description: self.description.clone(),
            entrypoint: self.entrypoint.clone(),
            checkpoint_storage: Some(checkpoint_storage),
            hyperparameters: self.hyperparameters.clone(),
            searcher,
            resources: Some(resources),
            max_restarts: Some(self.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS)),
            scheduling_unit: Some(self.scheduling_unit.unwrap_or(DEFAULT_SCHEDULING_UNIT)),
            records_per_epoch: Some(self.records_per_epoch.unwrap_or(0)),
            integrations: self.integrations.clone(),
        }
    }

    /// Check the fields the schema requires.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.entrypoint.as_deref().map_or(true, str::is_empty) {
            return Err(HarnessError::validation_error("entrypoint is required"));
        }
        if self.hyperparameters.is_empty() {
            return Err(HarnessError::validation_error(
                "at least one hyperparameter is required",
            ));
        }
        let searcher = self
            .searcher
            .as_ref()
            .ok_or_else(|| HarnessError::validation_error("searcher is required"))?;
        if searcher.metric.as_deref().map_or(true, str::is_empty) {
            return Err(HarnessError::validation_error("searcher.metric is required"));
        }
        if matches!(searcher.name, SearcherKind::Random) && searcher.max_trials.unwrap_or(0) == 0 {
            return Err(HarnessError::validation_error(
                "searcher.max_trials must be positive for the random searcher",
            ));
        }
        for (name, hp) in &self.hyperparameters {
            match hp {
                Hyperparameter::Int { minval, maxval } if minval > maxval => {
                    return Err(HarnessError::validation_error(format!(
                        "hyperparameter {name}: minval must not exceed maxval"
                    )));
                }
                Hyperparameter::Double { minval, maxval } if minval > maxval => {
                    return Err(HarnessError::validation_error(format!(
                        "hyperparameter {name}: minval must not exceed maxval"
                    )));
                }
                Hyperparameter::Categorical { vals } if vals.is_empty() => {
                    return Err(HarnessError::validation_error(format!(
                        "hyperparameter {name}: categorical values must not be empty"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Defaulting followed by validation; the form a configuration is stored in.
    pub fn normalize(&self) -> HarnessResult<Self> {
        let defaulted = self.with_defaults();
        defaulted.validate()?;
        Ok(defaulted)
    }

    /// Legacy view of a defaulted configuration.
    pub fn as_legacy(&self) -> HarnessResult<LegacyConfig> {
        let defaulted = self.normalize()?;
        let searcher = defaulted
            .searcher
            .ok_or_else(|| HarnessError::validation_error("searcher is required"))?;
        Ok(LegacyConfig {
            checkpoint_storage: defaulted
                .checkpoint_storage
                .ok_or_else(|| HarnessError::validation_error("checkpoint_storage is required"))?,
            hyperparameter_names: defaulted.hyperparameters.keys().cloned().collect(),
            searcher_metric: searcher.metric.unwrap_or_default(),
            smaller_is_better: searcher.smaller_is_better.unwrap_or(true),
            max_restarts: defaulted.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS),
        })
    }

    pub fn hyperparameter_names(&self) -> Vec<String> {
        self.hyperparameters.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ExperimentConfig {
        ExperimentConfig {
            entrypoint: Some("model.Classifier".to_string()),
            checkpoint_storage: Some(CheckpointStorageConfig::SharedFs {
                host_path: "/home/ckpts".to_string(),
                storage_path: None,
                retention: CheckpointRetention::default(),
            }),
            hyperparameters: BTreeMap::from([(
                "global_batch_size".to_string(),
                Hyperparameter::constant(1.0),
            )]),
            searcher: Some(SearcherConfig::single("okness")),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaulting_is_idempotent() {
        let once = minimal().with_defaults();
        let twice = once.with_defaults();
        assert_eq!(once, twice);
        assert_eq!(
            serde_json::to_vec(&once).unwrap(),
            serde_json::to_vec(&twice).unwrap()
        );
    }

    #[test]
    fn test_defaulting_fills_omitted_fields() {
        let cfg = minimal().with_defaults();
        assert_eq!(cfg.name.as_deref(), Some(DEFAULT_EXPERIMENT_NAME));
        assert_eq!(cfg.max_restarts, Some(5));
        assert_eq!(cfg.records_per_epoch, Some(0));
        let searcher = cfg.searcher.unwrap();
        assert_eq!(searcher.smaller_is_better, Some(true));
        assert_eq!(searcher.max_trials, Some(1));
        match cfg.checkpoint_storage.unwrap() {
            CheckpointStorageConfig::SharedFs {
                host_path,
                storage_path,
                retention,
            } => {
                assert_eq!(host_path, "/home/ckpts");
                assert_eq!(storage_path.as_deref(), Some(DEFAULT_STORAGE_PATH));
                assert_eq!(retention.save_trial_best, Some(1));
            }
            other => panic!("unexpected storage {other:?}"),
        }
    }

    #[test]
    fn test_explicit_values_survive_defaulting() {
        let mut cfg = minimal();
        cfg.max_restarts = Some(0);
        cfg.searcher.as_mut().unwrap().smaller_is_better = Some(false);
        let cfg = cfg.with_defaults();
        assert_eq!(cfg.max_restarts, Some(0));
        assert_eq!(cfg.searcher.unwrap().smaller_is_better, Some(false));
    }

    #[test]
    fn test_validation_requires_metric_and_entrypoint() {
        let mut cfg = minimal();
        cfg.searcher = Some(SearcherConfig {
            name: SearcherKind::Single,
            metric: None,
            smaller_is_better: None,
            max_trials: None,
        });
        assert!(matches!(cfg.normalize(), Err(HarnessError::Validation(_))));

        let mut cfg = minimal();
        cfg.entrypoint = None;
        assert!(cfg.normalize().is_err());

        let mut cfg = minimal();
        cfg.hyperparameters.clear();
        assert!(cfg.normalize().is_err());
    }

    #[test]
    fn test_legacy_view() {
        let legacy = minimal().as_legacy().unwrap();
        assert_eq!(legacy.searcher_metric, "okness");
        assert_eq!(legacy.hyperparameter_names, vec!["global_batch_size".to_string()]);
        assert!(legacy.smaller_is_better);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(minimal().with_defaults()).unwrap();
        assert_eq!(json["checkpoint_storage"]["type"], "shared_fs");
        assert_eq!(json["checkpoint_storage"]["save_trial_latest"], 1);
        assert_eq!(json["hyperparameters"]["global_batch_size"]["type"], "const");
        assert_eq!(json["searcher"]["name"], "single");
    }
}
