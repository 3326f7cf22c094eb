//! Test doubles for the harness's injected capabilities.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use intg_core::RandomSource;
use intg_errors::HarnessResult;
use intg_infrastructure::{LockHandle, LockStrategy};
use sqlx::PgPool;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A process-local migration lock that never talks to the database.
///
/// Clones share the same lock and counters.
#[derive(Clone, Default)]
pub struct InMemoryLockStrategy {
    lock: Arc<Mutex<()>>,
    state: Arc<LockCounters>,
}

#[derive(Default)]
struct LockCounters {
    acquisitions: AtomicUsize,
    holders: AtomicUsize,
    max_holders: AtomicUsize,
}

impl InMemoryLockStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquisitions(&self) -> usize {
        self.state.acquisitions.load(Ordering::SeqCst)
    }

    /// Largest number of handles ever held at the same time.
    pub fn max_concurrent_holders(&self) -> usize {
        self.state.max_holders.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        self.state.holders.load(Ordering::SeqCst) > 0
    }
}

struct InMemoryLockHandle {
    _guard: OwnedMutexGuard<()>,
    state: Arc<LockCounters>,
}

#[async_trait]
impl LockStrategy for InMemoryLockStrategy {
    async fn acquire(&self, _pool: &PgPool) -> HarnessResult<Box<dyn LockHandle>> {
        let guard = self.lock.clone().lock_owned().await;
        self.state.acquisitions.fetch_add(1, Ordering::SeqCst);
        let holders = self.state.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_holders.fetch_max(holders, Ordering::SeqCst);
        Ok(Box::new(InMemoryLockHandle {
            _guard: guard,
            state: Arc::clone(&self.state),
        }))
    }
}

#[async_trait]
impl LockHandle for InMemoryLockHandle {
    async fn release(self: Box<Self>) -> HarnessResult<()> {
        Ok(())
    }
}

impl Drop for InMemoryLockHandle {
    fn drop(&mut self) {
        self.state.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Deterministic bytes: two sources with the same seed produce the same
/// sequence of draws.
#[derive(Debug, Default)]
pub struct SequenceRandomSource {
    seed: u64,
    draws: AtomicU64,
}

impl SequenceRandomSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            draws: AtomicU64::new(0),
        }
    }

    pub fn draws(&self) -> u64 {
        self.draws.load(Ordering::SeqCst)
    }
}

impl RandomSource for SequenceRandomSource {
    fn fill_bytes(&self, dest: &mut [u8]) {
        let draw = self.draws.fetch_add(1, Ordering::SeqCst);
        let mut state = self.seed ^ draw.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        for chunk in dest.chunks_mut(8) {
            // splitmix64
            state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^= z >> 31;
            chunk.copy_from_slice(&z.to_le_bytes()[..chunk.len()]);
        }
    }
}
