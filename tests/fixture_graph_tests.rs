use anyhow::Result;
use chrono::Utc;
use intg_harness::domain::{AllocationState, JobId, TaskId, TaskType};
use intg_harness::domain::{ExperimentConfig, MetricGroup};
use intg_harness::prelude::*;
use intg_testing_utils::{
    admin_user, allocation_in_state, database_exists, CheckpointOptionsBuilder, ExperimentOptionsBuilder,
    PostgresTestServer,
};
use tracing_test::traced_test;

async fn setup() -> Result<(PostgresTestServer, EphemeralDatabase, Fixtures)> {
    let server = PostgresTestServer::start().await?;
    let (db, fixtures) = intg_harness::ephemeral_fixtures(&server.config()?).await?;
    Ok((server, db, fixtures))
}

/// Cleanup must leave no database behind.
async fn teardown(server: &PostgresTestServer, db: EphemeralDatabase) -> Result<()> {
    let admin = server.admin_pool().await?;
    let name = db.name().to_string();
    db.cleanup().await;
    assert!(!database_exists(&admin, &name).await?, "{name} survived cleanup");
    admin.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_experiment_in_named_project() -> Result<()> {
    let (server, db, fixtures) = setup().await?;

    let alice = fixtures.create_user(UserOptions::named("alice")).await?;
    let ws1 = fixtures.create_workspace(Some("ws1"), &alice).await?;
    let p1 = fixtures.create_named_project(&ws1, Some("p1"), false).await?;
    let experiment = fixtures
        .create_experiment_in_project(&alice, &p1, ExperimentOptions::default())
        .await?;

    let (project_id, owner_id): (i32, Option<i32>) =
        sqlx::query_as("SELECT project_id, owner_id FROM experiments WHERE id = $1")
            .bind(experiment.id)
            .fetch_one(db.pool())
            .await?;
    assert_eq!(project_id, p1.id);
    assert_eq!(owner_id, Some(alice.id));
    assert_eq!(experiment.username, "alice");
    assert_eq!(experiment.state, State::Active);
    assert!(logs_contain("created experiment"));

    teardown(&server, db).await
}

#[tokio::test]
async fn test_user_defaults_and_admin_override() -> Result<()> {
    let (server, db, fixtures) = setup().await?;

    let plain = fixtures.create_user(UserOptions::default()).await?;
    let admin = fixtures.create_user(admin_user()).await?;
    assert_ne!(plain.username, admin.username);

    let (active, is_admin, password_hash): (bool, bool, Option<String>) =
        sqlx::query_as("SELECT active, admin, password_hash FROM users WHERE id = $1")
            .bind(plain.id)
            .fetch_one(db.pool())
            .await?;
    assert!(active);
    assert!(!is_admin);
    assert_eq!(password_hash, None);

    let stored_admin: bool = sqlx::query_scalar("SELECT admin FROM users WHERE id = $1")
        .bind(admin.id)
        .fetch_one(db.pool())
        .await?;
    assert!(stored_admin);

    teardown(&server, db).await
}

#[tokio::test]
async fn test_checkpoint_follows_its_allocation() -> Result<()> {
    let (server, db, fixtures) = setup().await?;

    let user = fixtures.create_user(UserOptions::default()).await?;
    let experiment = fixtures.create_experiment(&user, ExperimentOptions::default()).await?;
    assert_eq!(experiment.project_id, 1);

    let (trial, task) = fixtures.create_trial(&experiment).await?;
    let allocation = fixtures.create_allocation(&task, AllocationOptions::default()).await?;
    let checkpoint = fixtures
        .create_checkpoint(&allocation, CheckpointOptions::default())
        .await?;

    assert_eq!(checkpoint.task_id, allocation.task_id);
    assert_eq!(allocation.allocation_id.as_str(), format!("{}-1", task.task_id));

    let stored = fixtures
        .get_checkpoint(checkpoint.uuid)
        .await?
        .expect("checkpoint was inserted");
    assert_eq!(stored.task_id, task.task_id);
    assert_eq!(stored.allocation_id, Some(allocation.allocation_id.clone()));
    assert_eq!(stored.resources, checkpoint.resources);
    assert_eq!(stored.steps_completed(), Some(10.0));
    assert_eq!(stored, checkpoint);

    let by_trial = fixtures.trial_checkpoints(trial.id).await?;
    assert_eq!(by_trial.len(), 1);
    assert_eq!(by_trial[0].uuid, checkpoint.uuid);
    assert_eq!(by_trial[0].size, 1);

    teardown(&server, db).await
}

#[tokio::test]
async fn test_metric_report_round_trip() -> Result<()> {
    let (server, db, fixtures) = setup().await?;

    let user = fixtures.create_user(UserOptions::default()).await?;
    let experiment = fixtures.create_experiment(&user, ExperimentOptions::default()).await?;
    let (trial, _task) = fixtures.create_trial(&experiment).await?;

    let report = TrialMetrics::new(trial.id, 5).with_metric("okness", 0.9);
    fixtures.record_metrics(&report, MetricGroup::Validation).await?;

    let stored = fixtures.trial_metrics(trial.id, MetricGroup::Validation).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].trial_id, trial.id);
    assert_eq!(stored[0].trial_run_id, 0);
    assert_eq!(stored[0].total_batches, 5);
    assert_eq!(stored[0].metric("okness"), Some(0.9));

    assert!(fixtures.trial_metrics(trial.id, MetricGroup::Training).await?.is_empty());

    teardown(&server, db).await
}

#[tokio::test]
async fn test_validation_metrics_use_default_searcher_metric() -> Result<()> {
    let (server, db, fixtures) = setup().await?;

    let user = fixtures.create_user(UserOptions::default()).await?;
    let experiment = fixtures.create_experiment(&user, ExperimentOptions::default()).await?;
    let (trial, _task) = fixtures.create_trial(&experiment).await?;

    fixtures.add_validation_metrics(&trial, 10, 0.5).await?;
    fixtures.add_validation_metrics(&trial, 20, 0.75).await?;

    let stored = fixtures.trial_metrics(trial.id, MetricGroup::Validation).await?;
    let values: Vec<_> = stored.iter().map(|r| (r.total_batches, r.metric("okness"))).collect();
    assert_eq!(values, vec![(10, Some(0.5)), (20, Some(0.75))]);

    teardown(&server, db).await
}

#[tokio::test]
async fn test_missing_prerequisite_is_foreign_key_violation() -> Result<()> {
    let (server, db, fixtures) = setup().await?;

    let user = fixtures.create_user(UserOptions::default()).await?;
    let experiment = fixtures.create_experiment(&user, ExperimentOptions::default()).await?;

    // A handle for a task that was never inserted.
    let phantom = Task {
        task_id: TaskId::from("never-inserted"),
        task_type: TaskType::Trial,
        job_id: Some(JobId::from("never-inserted")),
        start_time: Utc::now(),
    };
    let err = fixtures
        .create_allocation(&phantom, AllocationOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_foreign_key_violation(), "unexpected error: {err}");
    assert!(matches!(err, HarnessError::Insertion { entity: "allocation", .. }));

    let trial_err = fixtures
        .insert_trial(&experiment, &phantom, TrialOptions::default())
        .await
        .unwrap_err();
    assert!(trial_err.is_foreign_key_violation());

    teardown(&server, db).await
}

#[tokio::test]
async fn test_stored_config_is_normalized_and_merges_project_hparams() -> Result<()> {
    let (server, db, fixtures) = setup().await?;

    let user = fixtures.create_user(UserOptions::default()).await?;
    let workspace = fixtures.create_workspace(None, &user).await?;
    let project = fixtures.create_project(&workspace, false).await?;

    let first = fixtures
        .create_experiment_in_project(
            &user,
            &project,
            ExperimentOptionsBuilder::new().with_hyperparameters(&["lr", "dropout"]).build(),
        )
        .await?;
    fixtures
        .create_experiment_in_project(
            &user,
            &project,
            ExperimentOptionsBuilder::new().with_hyperparameters(&["lr", "momentum"]).build(),
        )
        .await?;

    let stored: ExperimentConfig = fixtures.experiment_config(first.id).await?;
    assert_eq!(stored, first.config);
    assert_eq!(stored.with_defaults(), stored);
    assert_eq!(first.legacy_config.hyperparameter_names, vec!["dropout", "lr"]);

    assert_eq!(
        fixtures.project_hyperparameters(project.id).await?,
        vec!["dropout", "lr", "momentum"]
    );

    teardown(&server, db).await
}

#[tokio::test]
async fn test_experiment_options_override_defaults() -> Result<()> {
    let (server, db, fixtures) = setup().await?;

    let user = fixtures.create_user(UserOptions::default()).await?;
    let workspace = fixtures.create_workspace(None, &user).await?;
    let project = fixtures.create_project(&workspace, true).await?;
    assert!(project.archived);

    let experiment = fixtures
        .create_experiment(
            &user,
            ExperimentOptionsBuilder::new()
                .with_project_id(project.id)
                .with_state(State::Paused)
                .with_external_id("ext-1")
                .with_pachyderm("images", "abc123")
                .build(),
        )
        .await?;
    assert_eq!(experiment.project_id, project.id);

    let (state, external_id): (String, Option<String>) =
        sqlx::query_as("SELECT state, external_experiment_id FROM experiments WHERE id = $1")
            .bind(experiment.id)
            .fetch_one(db.pool())
            .await?;
    assert_eq!(state, "PAUSED");
    assert_eq!(external_id.as_deref(), Some("ext-1"));
    assert!(experiment
        .config
        .integrations
        .as_ref()
        .and_then(|i| i.pachyderm.as_ref())
        .is_some());

    teardown(&server, db).await
}

#[tokio::test]
async fn test_workspaces_bulk_create_and_delete() -> Result<()> {
    let (server, db, fixtures) = setup().await?;

    let user = fixtures.create_user(UserOptions::default()).await?;
    let names: Vec<String> = ["bulk-a", "bulk-b", "bulk-c"].iter().map(|s| s.to_string()).collect();
    let ids = fixtures.create_workspaces(&names, &user).await?;
    assert_eq!(ids.len(), 3);

    let stored_names: Vec<String> = sqlx::query_scalar("SELECT name FROM workspaces WHERE id = ANY($1) ORDER BY id")
        .bind(&ids)
        .fetch_all(db.pool())
        .await?;
    assert_eq!(stored_names, names);

    assert_eq!(fixtures.delete_workspaces(&ids).await?, 3);
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workspaces WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_one(db.pool())
        .await?;
    assert_eq!(remaining, 0);

    teardown(&server, db).await
}

#[tokio::test]
async fn test_jobs_tasks_and_custom_allocations() -> Result<()> {
    let (server, db, fixtures) = setup().await?;

    let (job, task) = fixtures.create_task_with_job(None).await?;
    assert_eq!(job.owner_id, None);
    assert_eq!(task.job_id.as_ref(), Some(&job.job_id));

    let start_time: chrono::DateTime<Utc> = sqlx::query_scalar("SELECT start_time FROM tasks WHERE task_id = $1")
        .bind(task.task_id.as_str())
        .fetch_one(db.pool())
        .await?;
    assert_eq!(start_time, task.start_time);

    let second = fixtures
        .create_allocation(&task, allocation_in_state(2, AllocationState::Running))
        .await?;
    assert_eq!(second.allocation_id.as_str(), format!("{}-2", task.task_id));

    let checkpoint = fixtures
        .create_checkpoint(
            &second,
            CheckpointOptionsBuilder::new()
                .with_steps(25)
                .with_resource("model.pt", 4096)
                .with_metadata("framework", serde_json::json!("torch"))
                .build(),
        )
        .await?;
    let stored = fixtures.get_checkpoint(checkpoint.uuid).await?.expect("inserted");
    assert_eq!(stored.size(), 4096);
    assert_eq!(stored.metadata["framework"], serde_json::json!("torch"));
    assert_eq!(stored.steps_completed(), Some(25.0));

    assert_eq!(fixtures.exec("UPDATE tasks SET end_time = NOW()").await?, 1);

    teardown(&server, db).await
}
