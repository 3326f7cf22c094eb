use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use intg_domain::{random_uuid, Allocation, AllocationId, Checkpoint, State, TaskId};
use intg_errors::HarnessResult;
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{insertion, Fixtures};

const DEFAULT_STEPS_COMPLETED: f64 = 10.0;

/// Overrides for a mock checkpoint. `extra_metadata` entries are merged over
/// the default metadata, so they can also replace it key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointOptions {
    pub steps_completed: Option<f64>,
    pub state: Option<State>,
    pub report_time: Option<DateTime<Utc>>,
    pub resources: Option<BTreeMap<String, i64>>,
    pub extra_metadata: serde_json::Map<String, serde_json::Value>,
}

impl CheckpointOptions {
    pub fn with_steps(steps: u32) -> Self {
        Self {
            steps_completed: Some(f64::from(steps)),
            ..Default::default()
        }
    }
}

/// Build, without inserting, a checkpoint reported by `allocation`.
pub fn mock_checkpoint(uuid: Uuid, allocation: &Allocation, options: CheckpointOptions) -> Checkpoint {
    let mut metadata = serde_json::Map::new();
    metadata.insert("framework".to_string(), json!("some framework"));
    metadata.insert("determined_version".to_string(), json!("1.0.0"));
    metadata.insert(
        "steps_completed".to_string(),
        json!(options.steps_completed.unwrap_or(DEFAULT_STEPS_COMPLETED)),
    );
    metadata.extend(options.extra_metadata);

    Checkpoint {
        uuid,
        task_id: allocation.task_id.clone(),
        allocation_id: Some(allocation.allocation_id.clone()),
        report_time: options
            .report_time
            .unwrap_or_else(|| Utc::now().trunc_subsecs(3)),
        state: options.state.unwrap_or(State::Completed),
        resources: options
            .resources
            .unwrap_or_else(|| BTreeMap::from([("ok".to_string(), 1)])),
        metadata,
    }
}

/// A row of the trial checkpoints view.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialCheckpoint {
    pub uuid: Uuid,
    pub task_id: TaskId,
    pub trial_id: Option<i32>,
    pub state: State,
    pub size: i64,
    pub steps_completed: Option<f64>,
}

fn row_to_checkpoint(row: &PgRow) -> HarnessResult<Checkpoint> {
    let Json(resources): Json<BTreeMap<String, i64>> = row.try_get("resources")?;
    let Json(metadata): Json<serde_json::Map<String, serde_json::Value>> = row.try_get("metadata")?;
    Ok(Checkpoint {
        uuid: row.try_get("uuid")?,
        task_id: row.try_get("task_id")?,
        allocation_id: row.try_get::<Option<AllocationId>, _>("allocation_id")?,
        report_time: row.try_get("report_time")?,
        state: row.try_get("state")?,
        resources,
        metadata,
    })
}

impl Fixtures {
    #[instrument(skip_all, fields(uuid = %checkpoint.uuid))]
    pub async fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> HarnessResult<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (uuid, task_id, allocation_id, report_time, state, resources, metadata, size)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(checkpoint.uuid)
        .bind(&checkpoint.task_id)
        .bind(&checkpoint.allocation_id)
        .bind(checkpoint.report_time)
        .bind(checkpoint.state)
        .bind(Json(&checkpoint.resources))
        .bind(Json(&checkpoint.metadata))
        .bind(checkpoint.size())
        .execute(self.pool())
        .await
        .map_err(insertion("checkpoint"))?;

        debug!(task_id = %checkpoint.task_id, "created checkpoint");
        Ok(())
    }

    /// Mock a checkpoint with a fresh UUID and insert it.
    pub async fn create_checkpoint(
        &self,
        allocation: &Allocation,
        options: CheckpointOptions,
    ) -> HarnessResult<Checkpoint> {
        let checkpoint = mock_checkpoint(random_uuid(self.random()), allocation, options);
        self.insert_checkpoint(&checkpoint).await?;
        Ok(checkpoint)
    }

    pub async fn get_checkpoint(&self, uuid: Uuid) -> HarnessResult<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT uuid, task_id, allocation_id, report_time, state, resources, metadata
            FROM checkpoints
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_checkpoint).transpose()
    }

    /// Checkpoints reported by any task of the trial, oldest first.
    pub async fn trial_checkpoints(&self, trial_id: i32) -> HarnessResult<Vec<TrialCheckpoint>> {
        let rows = sqlx::query(
            r#"
            SELECT uuid, task_id, trial_id, state, size, steps_completed
            FROM harness_code.trial_checkpoints
            WHERE trial_id = $1
            ORDER BY report_time, uuid
            "#,
        )
        .bind(trial_id)
        .fetch_all(self.pool())
        .await?;

        let mut checkpoints = Vec::with_capacity(rows.len());
        for row in rows {
            checkpoints.push(TrialCheckpoint {
                uuid: row.try_get("uuid")?,
                task_id: row.try_get("task_id")?,
                trial_id: row.try_get("trial_id")?,
                state: row.try_get("state")?,
                size: row.try_get("size")?,
                steps_completed: row.try_get("steps_completed")?,
            });
        }
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation() -> Allocation {
        Allocation {
            allocation_id: AllocationId::from("t1-1"),
            task_id: TaskId::from("t1"),
            start_time: None,
            state: None,
        }
    }

    #[test]
    fn test_mock_checkpoint_defaults() {
        let checkpoint = mock_checkpoint(Uuid::nil(), &allocation(), CheckpointOptions::default());
        assert_eq!(checkpoint.task_id.as_str(), "t1");
        assert_eq!(checkpoint.allocation_id, Some(AllocationId::from("t1-1")));
        assert_eq!(checkpoint.state, State::Completed);
        assert_eq!(checkpoint.size(), 1);
        assert_eq!(checkpoint.steps_completed(), Some(10.0));
        assert_eq!(checkpoint.metadata["framework"], json!("some framework"));
        assert_eq!(checkpoint.metadata["determined_version"], json!("1.0.0"));
        assert_eq!(checkpoint.report_time.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_steps_and_extra_metadata_override() {
        let mut options = CheckpointOptions::with_steps(25);
        options
            .extra_metadata
            .insert("framework".to_string(), json!("torch"));
        options.extra_metadata.insert("note".to_string(), json!("x"));

        let checkpoint = mock_checkpoint(Uuid::nil(), &allocation(), options);
        assert_eq!(checkpoint.steps_completed(), Some(25.0));
        assert_eq!(checkpoint.metadata["framework"], json!("torch"));
        assert_eq!(checkpoint.metadata["note"], json!("x"));
    }
}
