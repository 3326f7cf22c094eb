use chrono::{SubsecRound, Utc};
use intg_domain::{Job, JobId, JobType, Task, TaskId, TaskType, User};
use intg_errors::HarnessResult;
use tracing::{debug, instrument};

use super::{insertion, Fixtures};

impl Fixtures {
    /// Insert an `EXPERIMENT` job, optionally owned by `owner`.
    pub async fn create_job(&self, owner: Option<&User>) -> HarnessResult<Job> {
        self.insert_job(owner.map(|u| u.id), JobType::Experiment).await
    }

    #[instrument(skip(self))]
    pub(crate) async fn insert_job(&self, owner_id: Option<i32>, job_type: JobType) -> HarnessResult<Job> {
        let job = Job {
            job_id: JobId::generate(self.random()),
            job_type,
            owner_id,
            q_position: 0.0,
        };
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, job_type, owner_id, q_position)
            VALUES ($1, $2, $3, $4::numeric)
            "#,
        )
        .bind(&job.job_id)
        .bind(job.job_type)
        .bind(job.owner_id)
        .bind(job.q_position)
        .execute(self.pool())
        .await
        .map_err(insertion("job"))?;

        debug!(job_id = %job.job_id, "created job");
        Ok(job)
    }

    /// Insert a `TRIAL` task under `job`.
    pub async fn create_task(&self, job: &Job) -> HarnessResult<Task> {
        let task = Task {
            task_id: TaskId::generate(self.random()),
            task_type: TaskType::Trial,
            job_id: Some(job.job_id.clone()),
            start_time: Utc::now().trunc_subsecs(3),
        };
        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, task_type, job_id, start_time)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&task.task_id)
        .bind(task.task_type)
        .bind(&task.job_id)
        .bind(task.start_time)
        .execute(self.pool())
        .await
        .map_err(insertion("task"))?;

        debug!(task_id = %task.task_id, job_id = %job.job_id, "created task");
        Ok(task)
    }

    /// A fresh job and one task under it.
    pub async fn create_task_with_job(&self, owner: Option<&User>) -> HarnessResult<(Job, Task)> {
        let job = self.create_job(owner).await?;
        let task = self.create_task(&job).await?;
        Ok((job, task))
    }
}
