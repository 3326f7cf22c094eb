use chrono::{DateTime, SubsecRound, Utc};
use intg_domain::{Experiment, JobType, RequestId, State, Task, Trial};
use intg_errors::HarnessResult;
use sqlx::types::Json;
use tracing::{debug, instrument};

use super::{insertion, Fixtures};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialOptions {
    /// Generated when absent.
    pub request_id: Option<RequestId>,
    pub state: Option<State>,
    pub hparams: Option<serde_json::Value>,
    pub start_time: Option<DateTime<Utc>>,
}

pub fn apply_trial_options(options: &TrialOptions, experiment: &Experiment, request_id: RequestId) -> Trial {
    Trial {
        id: 0,
        request_id: Some(options.request_id.clone().unwrap_or(request_id)),
        experiment_id: experiment.id,
        state: options.state.unwrap_or(State::Active),
        start_time: options
            .start_time
            .unwrap_or_else(|| Utc::now().trunc_subsecs(3)),
        hparams: options
            .hparams
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "global_batch_size": 1 })),
    }
}

impl Fixtures {
    /// Insert a trial of `experiment` running as `task`.
    #[instrument(skip_all, fields(experiment_id = experiment.id, task_id = %task.task_id))]
    pub async fn insert_trial(
        &self,
        experiment: &Experiment,
        task: &Task,
        options: TrialOptions,
    ) -> HarnessResult<Trial> {
        let mut trial = apply_trial_options(&options, experiment, RequestId::generate(self.random()));

        trial.id = sqlx::query_scalar(
            r#"
            INSERT INTO trials (request_id, experiment_id, state, start_time, hparams)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&trial.request_id)
        .bind(trial.experiment_id)
        .bind(trial.state)
        .bind(trial.start_time)
        .bind(Json(&trial.hparams))
        .fetch_one(self.pool())
        .await
        .map_err(insertion("trial"))?;

        sqlx::query("INSERT INTO trial_id_task_id (trial_id, task_id) VALUES ($1, $2)")
            .bind(trial.id)
            .bind(&task.task_id)
            .execute(self.pool())
            .await
            .map_err(insertion("trial task mapping"))?;

        debug!(trial_id = trial.id, "created trial");
        Ok(trial)
    }

    /// Job, task and trial for `experiment`, owned by the experiment's owner.
    pub async fn create_trial(&self, experiment: &Experiment) -> HarnessResult<(Trial, Task)> {
        let job = self.insert_job(experiment.owner_id, JobType::Experiment).await?;
        let task = self.create_task(&job).await?;
        let trial = self.insert_trial(experiment, &task, TrialOptions::default()).await?;
        Ok((trial, task))
    }

    /// Task ids a trial has run as.
    pub async fn trial_task_ids(&self, trial_id: i32) -> HarnessResult<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT task_id FROM trial_id_task_id WHERE trial_id = $1")
            .bind(trial_id)
            .fetch_all(self.pool())
            .await?;
        Ok(ids)
    }
}
