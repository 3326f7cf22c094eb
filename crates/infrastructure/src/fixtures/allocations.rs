use chrono::{DateTime, SubsecRound, Utc};
use intg_domain::{Allocation, AllocationId, AllocationState, Task};
use intg_errors::HarnessResult;
use tracing::debug;

use super::{insertion, Fixtures};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationOptions {
    /// Suffix of the allocation id; defaults to 1.
    pub sequence: Option<u32>,
    pub state: Option<AllocationState>,
    pub start_time: Option<DateTime<Utc>>,
}

pub fn apply_allocation_options(options: &AllocationOptions, task: &Task) -> Allocation {
    Allocation {
        allocation_id: AllocationId::for_task(&task.task_id, options.sequence.unwrap_or(1)),
        task_id: task.task_id.clone(),
        start_time: Some(
            options
                .start_time
                .unwrap_or_else(|| Utc::now().trunc_subsecs(3)),
        ),
        state: Some(options.state.unwrap_or(AllocationState::Terminated)),
    }
}

impl Fixtures {
    pub async fn create_allocation(&self, task: &Task, options: AllocationOptions) -> HarnessResult<Allocation> {
        let allocation = apply_allocation_options(&options, task);
        sqlx::query(
            r#"
            INSERT INTO allocations (allocation_id, task_id, start_time, state)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&allocation.allocation_id)
        .bind(&allocation.task_id)
        .bind(allocation.start_time)
        .bind(allocation.state)
        .execute(self.pool())
        .await
        .map_err(insertion("allocation"))?;

        debug!(allocation_id = %allocation.allocation_id, "created allocation");
        Ok(allocation)
    }
}
