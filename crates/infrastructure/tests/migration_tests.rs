use std::sync::Arc;

use anyhow::Result;
use intg_infrastructure::{
    EphemeralDatabaseProvisioner, MigrationAction, MigrationLockCoordinator, Migrator,
    NoopLockStrategy,
};
use intg_testing_utils::{table_exists, PostgresTestServer};

const FIRST_VERSION: i64 = 20240101000001;

fn unlocked(config: &intg_core::HarnessConfig) -> Migrator {
    Migrator::for_config(config)
        .with_coordinator(MigrationLockCoordinator::new(Arc::new(NoopLockStrategy)))
}

/// 测试从空库迁移
#[tokio::test]
async fn test_migrations_from_scratch() -> Result<()> {
    intg_core::init_test_logging();
    let server = PostgresTestServer::start().await?;
    let config = server.config()?;
    let db = EphemeralDatabaseProvisioner::new(config.clone())
        .provision_migrated(&[])
        .await?;
    let pool = db.pool();

    for table in [
        "users",
        "workspaces",
        "projects",
        "jobs",
        "tasks",
        "experiments",
        "trials",
        "trial_id_task_id",
        "allocations",
        "checkpoints",
        "metrics",
        "auth_token_keypair",
    ] {
        assert!(table_exists(pool, "public", table).await?, "missing table {table}");
    }

    let view: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.views WHERE table_schema = 'harness_code' AND table_name = 'trial_checkpoints')",
    )
    .fetch_one(pool)
    .await?;
    assert!(view);

    // 默认数据
    let admin: String = sqlx::query_scalar("SELECT username FROM users WHERE id = 1")
        .fetch_one(pool)
        .await?;
    assert_eq!(admin, "admin");
    let project: String = sqlx::query_scalar("SELECT name FROM projects WHERE id = $1")
        .bind(config.default_project_id)
        .fetch_one(pool)
        .await?;
    assert_eq!(project, "Uncategorized");

    let keypairs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auth_token_keypair")
        .fetch_one(pool)
        .await?;
    assert_eq!(keypairs, 1);

    db.cleanup().await;
    Ok(())
}

/// 测试迁移的幂等性
#[tokio::test]
async fn test_migration_idempotency() -> Result<()> {
    let server = PostgresTestServer::start().await?;
    let config = server.config()?;
    let db = EphemeralDatabaseProvisioner::new(config.clone())
        .provision_migrated(&[MigrationAction::Up])
        .await?;

    let key_before: Vec<u8> = sqlx::query_scalar("SELECT public_key FROM auth_token_keypair")
        .fetch_one(db.pool())
        .await?;

    unlocked(&config)
        .migrate(db.pool(), &config.migrations_path, &[MigrationAction::Up])
        .await?;

    let key_after: Vec<u8> = sqlx::query_scalar("SELECT public_key FROM auth_token_keypair")
        .fetch_one(db.pool())
        .await?;
    assert_eq!(key_before, key_after);

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(db.pool())
        .await?;
    assert_eq!(applied, 4);

    db.cleanup().await;
    Ok(())
}

/// 测试回滚后重新迁移
#[tokio::test]
async fn test_down_then_up_round_trip() -> Result<()> {
    let server = PostgresTestServer::start().await?;
    let config = server.config()?;
    let db = EphemeralDatabaseProvisioner::new(config.clone())
        .provision_migrated(&[MigrationAction::Up])
        .await?;
    let pool = db.pool();
    let migrator = unlocked(&config);

    migrator
        .migrate(pool, &config.migrations_path, &[MigrationAction::Down])
        .await?;
    assert!(!table_exists(pool, "public", "auth_token_keypair").await?);
    assert!(table_exists(pool, "public", "checkpoints").await?);
    assert!(!table_exists(pool, "harness_code", "trial_checkpoints").await?);

    migrator
        .migrate(pool, &config.migrations_path, &[MigrationAction::DownTo(FIRST_VERSION)])
        .await?;
    assert!(table_exists(pool, "public", "users").await?);
    assert!(!table_exists(pool, "public", "jobs").await?);

    migrator
        .migrate(pool, &config.migrations_path, &[MigrationAction::Up])
        .await?;
    assert!(table_exists(pool, "public", "auth_token_keypair").await?);
    assert!(table_exists(pool, "harness_code", "trial_checkpoints").await?);

    db.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_migrations_path_is_migration_error() -> Result<()> {
    let server = PostgresTestServer::start().await?;
    let config = server.config()?;
    let db = EphemeralDatabaseProvisioner::new(config.clone()).provision().await?;

    let err = unlocked(&config)
        .migrate(db.pool(), "file:///no/such/migrations", &[])
        .await
        .unwrap_err();
    match err {
        intg_errors::HarnessError::Migration { path, direction, .. } => {
            assert_eq!(path, "/no/such/migrations");
            assert_eq!(direction, "up");
        }
        other => panic!("unexpected error: {other}"),
    }

    db.cleanup().await;
    Ok(())
}
