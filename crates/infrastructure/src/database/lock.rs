//! Mutual exclusion for schema migrations on a shared database.
//!
//! Several test processes may point at the same Postgres database. Each one
//! runs the migrator on startup, so the migrator runs inside a
//! transaction-scoped advisory lock. Whoever gets the lock first migrates;
//! the others block until the holder commits and then find nothing left to do.

use std::sync::Arc;

use async_trait::async_trait;
use intg_core::MIGRATION_LOCK_ID;
use intg_errors::{HarnessError, HarnessResult};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error};

/// A way of acquiring the migration lock.
#[async_trait]
pub trait LockStrategy: Send + Sync {
    async fn acquire(&self, pool: &PgPool) -> HarnessResult<Box<dyn LockHandle>>;
}

/// A held lock. Dropping a handle without releasing it lets go of the lock
/// without reporting errors.
#[async_trait]
pub trait LockHandle: Send {
    async fn release(self: Box<Self>) -> HarnessResult<()>;
}

/// `pg_advisory_xact_lock` held by an open transaction.
#[derive(Debug, Clone, Copy)]
pub struct AdvisoryLockStrategy {
    lock_id: i64,
}

impl AdvisoryLockStrategy {
    pub fn new(lock_id: i64) -> Self {
        Self { lock_id }
    }

    pub fn lock_id(&self) -> i64 {
        self.lock_id
    }
}

impl Default for AdvisoryLockStrategy {
    fn default() -> Self {
        Self::new(MIGRATION_LOCK_ID)
    }
}

struct AdvisoryLockHandle {
    tx: Transaction<'static, Postgres>,
    lock_id: i64,
}

#[async_trait]
impl LockStrategy for AdvisoryLockStrategy {
    async fn acquire(&self, pool: &PgPool) -> HarnessResult<Box<dyn LockHandle>> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| HarnessError::lock(format!("failed to start lock transaction: {e}")))?;

        if let Err(e) = sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(self.lock_id)
            .execute(&mut *tx)
            .await
        {
            if let Err(rollback) = tx.rollback().await {
                error!(error = %rollback, "failed to roll back lock transaction");
            }
            return Err(HarnessError::lock(format!(
                "failed to acquire advisory lock {:#x}: {e}",
                self.lock_id
            )));
        }

        debug!(lock_id = self.lock_id, "acquired migration lock");
        Ok(Box::new(AdvisoryLockHandle {
            tx,
            lock_id: self.lock_id,
        }))
    }
}

#[async_trait]
impl LockHandle for AdvisoryLockHandle {
    async fn release(self: Box<Self>) -> HarnessResult<()> {
        let lock_id = self.lock_id;
        self.tx
            .commit()
            .await
            .map_err(|e| HarnessError::lock(format!("failed to release advisory lock {lock_id:#x}: {e}")))?;
        debug!(lock_id, "released migration lock");
        Ok(())
    }
}

/// Acquires nothing. For databases the caller already owns exclusively.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLockStrategy;

struct NoopLockHandle;

#[async_trait]
impl LockStrategy for NoopLockStrategy {
    async fn acquire(&self, _pool: &PgPool) -> HarnessResult<Box<dyn LockHandle>> {
        Ok(Box::new(NoopLockHandle))
    }
}

#[async_trait]
impl LockHandle for NoopLockHandle {
    async fn release(self: Box<Self>) -> HarnessResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct MigrationLockCoordinator {
    strategy: Arc<dyn LockStrategy>,
}

impl MigrationLockCoordinator {
    pub fn new(strategy: Arc<dyn LockStrategy>) -> Self {
        Self { strategy }
    }

    pub fn advisory(lock_id: i64) -> Self {
        Self::new(Arc::new(AdvisoryLockStrategy::new(lock_id)))
    }

    /// Block until the lock is held.
    pub async fn try_lock(&self, pool: &PgPool) -> HarnessResult<MigrationGuard> {
        let handle = self.strategy.acquire(pool).await?;
        Ok(MigrationGuard { handle })
    }

    /// Like [`try_lock`](Self::try_lock), for test setup that cannot continue
    /// without the lock.
    ///
    /// # Panics
    ///
    /// If the lock cannot be acquired.
    pub async fn lock(&self, pool: &PgPool) -> MigrationGuard {
        match self.try_lock(pool).await {
            Ok(guard) => guard,
            Err(e) => panic!("error acquiring migration lock: {e}"),
        }
    }
}

impl Default for MigrationLockCoordinator {
    fn default() -> Self {
        Self::new(Arc::new(AdvisoryLockStrategy::default()))
    }
}

/// Proof that the migration lock is held.
#[must_use = "the lock is released without error reporting when the guard is dropped"]
pub struct MigrationGuard {
    handle: Box<dyn LockHandle>,
}

impl MigrationGuard {
    pub async fn try_unlock(self) -> HarnessResult<()> {
        self.handle.release().await
    }

    /// # Panics
    ///
    /// If releasing the lock fails.
    pub async fn unlock(self) {
        if let Err(e) = self.try_unlock().await {
            panic!("error releasing migration lock: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://postgres@127.0.0.1:1/unused")
            .unwrap()
    }

    #[test]
    fn test_default_lock_id() {
        assert_eq!(AdvisoryLockStrategy::default().lock_id(), 0x33ad0708c9bed25b);
        assert_eq!(AdvisoryLockStrategy::new(7).lock_id(), 7);
    }

    #[tokio::test]
    async fn test_noop_strategy_never_touches_the_database() {
        let coordinator = MigrationLockCoordinator::new(Arc::new(NoopLockStrategy));
        let pool = lazy_pool();
        let guard = coordinator.try_lock(&pool).await.unwrap();
        guard.try_unlock().await.unwrap();
        // A second round on the same pool is equally free.
        coordinator.lock(&pool).await.unlock().await;
    }
}
