use std::collections::BTreeMap;

use chrono::{Duration, SubsecRound, Utc};
use intg_domain::{
    CheckpointRetention, CheckpointStorageConfig, Experiment, ExperimentConfig, Hyperparameter,
    IntegrationsConfig, JobType, Project, SearcherConfig, State, User,
};
use intg_errors::{HarnessError, HarnessResult};
use sqlx::types::Json;
use tracing::{debug, instrument};

use super::{insertion, Fixtures};
use crate::archive::read_model_definition;

pub const MOCK_ENTRYPOINT: &str = "model.Classifier";
pub const MOCK_CHECKPOINT_HOST_PATH: &str = "/home/ckpts";

/// Overrides for [`Fixtures::create_experiment`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentOptions {
    /// Replaces the default `global_batch_size` hyperparameter with one
    /// constant hyperparameter per name.
    pub hyperparameter_names: Option<Vec<String>>,
    /// Takes precedence over the project passed to the builder.
    pub project_id: Option<i32>,
    pub external_experiment_id: Option<String>,
    /// Defaults to `ACTIVE`.
    pub state: Option<State>,
    pub integrations: Option<IntegrationsConfig>,
}

/// The configuration an experiment fixture starts from, before defaulting.
pub fn mock_experiment_config(options: &ExperimentOptions, searcher_metric: &str) -> ExperimentConfig {
    let hyperparameters = match &options.hyperparameter_names {
        Some(names) => names
            .iter()
            .map(|name| (name.clone(), Hyperparameter::constant(1)))
            .collect(),
        None => BTreeMap::from([(
            "global_batch_size".to_string(),
            Hyperparameter::constant(1.0),
        )]),
    };

    ExperimentConfig {
        entrypoint: Some(MOCK_ENTRYPOINT.to_string()),
        checkpoint_storage: Some(CheckpointStorageConfig::SharedFs {
            host_path: MOCK_CHECKPOINT_HOST_PATH.to_string(),
            storage_path: None,
            retention: CheckpointRetention::default(),
        }),
        hyperparameters,
        searcher: Some(SearcherConfig::single(searcher_metric)),
        integrations: options.integrations.clone(),
        ..Default::default()
    }
}

impl Fixtures {
    /// An experiment in the default project.
    pub async fn create_experiment(&self, owner: &User, options: ExperimentOptions) -> HarnessResult<Experiment> {
        let project_id = self.defaults().project_id;
        self.insert_experiment(owner, project_id, options).await
    }

    pub async fn create_experiment_in_project(
        &self,
        owner: &User,
        project: &Project,
        options: ExperimentOptions,
    ) -> HarnessResult<Experiment> {
        self.insert_experiment(owner, project.id, options).await
    }

    #[instrument(skip(self, owner, options), fields(owner_id = owner.id))]
    async fn insert_experiment(
        &self,
        owner: &User,
        project_id: i32,
        options: ExperimentOptions,
    ) -> HarnessResult<Experiment> {
        let config = mock_experiment_config(&options, &self.defaults().searcher_metric).normalize()?;
        let legacy_config = config.as_legacy()?;

        let path = self.defaults().model_definition_path.clone();
        let model_definition = tokio::task::spawn_blocking(move || read_model_definition(path))
            .await
            .map_err(|e| HarnessError::archive(format!("model definition task failed: {e}")))??;

        let job = self.insert_job(Some(owner.id), JobType::Experiment).await?;

        let mut experiment = Experiment {
            id: 0,
            job_id: job.job_id,
            state: options.state.unwrap_or(State::Active),
            config,
            legacy_config,
            start_time: (Utc::now() - Duration::hours(1)).trunc_subsecs(3),
            owner_id: Some(owner.id),
            username: owner.username.clone(),
            project_id: options.project_id.unwrap_or(project_id),
            external_experiment_id: options.external_experiment_id,
        };

        experiment.id = sqlx::query_scalar(
            r#"
            INSERT INTO experiments
                (job_id, state, config, model_definition, start_time, owner_id, project_id, external_experiment_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&experiment.job_id)
        .bind(experiment.state)
        .bind(Json(&experiment.config))
        .bind(model_definition)
        .bind(experiment.start_time)
        .bind(experiment.owner_id)
        .bind(experiment.project_id)
        .bind(&experiment.external_experiment_id)
        .fetch_one(self.pool())
        .await
        .map_err(insertion("experiment"))?;

        debug!(
            experiment_id = experiment.id,
            project_id = experiment.project_id,
            "created experiment"
        );
        Ok(experiment)
    }

    /// The configuration column of a stored experiment.
    pub async fn experiment_config(&self, experiment_id: i32) -> HarnessResult<ExperimentConfig> {
        let Json(config) = sqlx::query_scalar::<_, Json<ExperimentConfig>>(
            "SELECT config FROM experiments WHERE id = $1",
        )
        .bind(experiment_id)
        .fetch_one(self.pool())
        .await?;
        Ok(config)
    }
}
