use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::expconf::{ExperimentConfig, LegacyConfig};
use crate::value_objects::{
    AllocationId, AllocationState, JobId, JobType, RequestId, State, TaskId, TaskType,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub password_hash: Option<String>,
    pub active: bool,
    pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i32,
    pub name: String,
    pub user_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i32,
    pub workspace_id: i32,
    pub name: String,
    pub archived: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub job_type: JobType,
    pub owner_id: Option<i32>,
    /// Queue position, used for ordering only.
    pub q_position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub job_id: Option<JobId>,
    /// Millisecond precision, so it compares equal after a database round trip.
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: i32,
    pub job_id: JobId,
    pub state: State,
    /// Defaulted and validated configuration, as stored.
    pub config: ExperimentConfig,
    pub legacy_config: LegacyConfig,
    pub start_time: DateTime<Utc>,
    pub owner_id: Option<i32>,
    pub username: String,
    pub project_id: i32,
    pub external_experiment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: i32,
    pub request_id: Option<RequestId>,
    pub experiment_id: i32,
    pub state: State,
    pub start_time: DateTime<Utc>,
    pub hparams: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub allocation_id: AllocationId,
    pub task_id: TaskId,
    pub start_time: Option<DateTime<Utc>>,
    pub state: Option<AllocationState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub uuid: Uuid,
    pub task_id: TaskId,
    pub allocation_id: Option<AllocationId>,
    pub report_time: DateTime<Utc>,
    pub state: State,
    pub resources: BTreeMap<String, i64>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Checkpoint {
    /// Total size in bytes of every resource.
    pub fn size(&self) -> i64 {
        self.resources.values().sum()
    }

    pub fn steps_completed(&self) -> Option<f64> {
        self.metadata.get("steps_completed").and_then(|v| v.as_f64())
    }
}

impl Experiment {
    pub fn entity_description(&self) -> String {
        format!("experiment {} (project {})", self.id, self.project_id)
    }
}
