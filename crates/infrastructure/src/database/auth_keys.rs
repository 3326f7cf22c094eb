use std::sync::Arc;

use async_trait::async_trait;
use intg_core::{random_bytes, OsRandomSource, RandomSource};
use intg_errors::{HarnessError, HarnessResult};
use sqlx::PgPool;
use tracing::debug;

/// Seeds the token-signing keypair a freshly migrated database needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthKeyInitializer: Send + Sync {
    /// Must be idempotent: the migrator calls it after every migration pass.
    async fn init_auth_keys(&self, pool: &PgPool) -> HarnessResult<()>;
}

pub struct PgAuthKeyInitializer {
    random: Arc<dyn RandomSource>,
}

impl PgAuthKeyInitializer {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }
}

impl Default for PgAuthKeyInitializer {
    fn default() -> Self {
        Self::new(Arc::new(OsRandomSource))
    }
}

#[async_trait]
impl AuthKeyInitializer for PgAuthKeyInitializer {
    async fn init_auth_keys(&self, pool: &PgPool) -> HarnessResult<()> {
        let public_key: [u8; 32] = random_bytes(self.random.as_ref());
        let private_key: [u8; 64] = random_bytes(self.random.as_ref());

        let result = sqlx::query(
            "INSERT INTO auth_token_keypair (id, public_key, private_key) VALUES (1, $1, $2) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&public_key[..])
        .bind(&private_key[..])
        .execute(pool)
        .await
        .map_err(|e| HarnessError::insertion("auth token keypair", e))?;

        if result.rows_affected() > 0 {
            debug!("initialized auth token keypair");
        }
        Ok(())
    }
}
