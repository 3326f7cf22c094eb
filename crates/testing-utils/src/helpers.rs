//! Catalog queries for assertions on the server.

use anyhow::Result;
use sqlx::PgPool;

/// Whether a database with this name exists on the server.
pub async fn database_exists(admin: &PgPool, name: &str) -> Result<bool> {
    let exists = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(name)
        .fetch_one(admin)
        .await?;
    Ok(exists)
}

/// Sessions currently connected to the named database.
pub async fn connection_count(admin: &PgPool, name: &str) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM pg_stat_activity WHERE datname = $1")
        .bind(name)
        .fetch_one(admin)
        .await?;
    Ok(count)
}

/// Names of all databases created by the provisioner.
pub async fn ephemeral_databases(admin: &PgPool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar(
        "SELECT datname FROM pg_database WHERE datname LIKE 'intg-%' ORDER BY datname",
    )
    .fetch_all(admin)
    .await?;
    Ok(names)
}

pub async fn table_exists(pool: &PgPool, schema: &str, table: &str) -> Result<bool> {
    let exists = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = $1 AND table_name = $2
        )
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}
