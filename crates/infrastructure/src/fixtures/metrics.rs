use intg_domain::{MetricGroup, MetricReport, Metrics, Trial, TrialMetrics};
use intg_errors::{HarnessError, HarnessResult};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, instrument};

use super::{insertion, Fixtures};

impl Fixtures {
    /// Store a metric report and return its id.
    #[instrument(skip_all, fields(trial_id = metrics.trial_id, group = %group))]
    pub async fn record_metrics(&self, metrics: &TrialMetrics, group: MetricGroup) -> HarnessResult<i64> {
        if metrics.steps_completed < 0 {
            return Err(HarnessError::validation_error(format!(
                "steps_completed must not be negative, got {}",
                metrics.steps_completed
            )));
        }

        let id = sqlx::query_scalar(
            r#"
            INSERT INTO metrics (trial_id, trial_run_id, total_batches, metric_group, metrics)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(metrics.trial_id)
        .bind(metrics.trial_run_id)
        .bind(metrics.steps_completed)
        .bind(group)
        .bind(Json(&metrics.metrics))
        .fetch_one(self.pool())
        .await
        .map_err(insertion("metric report"))?;

        debug!(metric_id = id, "recorded metrics");
        Ok(id)
    }

    /// Report one validation value under the default searcher metric.
    pub async fn add_validation_metrics(&self, trial: &Trial, steps_completed: i32, value: f64) -> HarnessResult<i64> {
        let metrics = TrialMetrics::new(trial.id, steps_completed)
            .with_metric(self.defaults().searcher_metric.clone(), value);
        self.record_metrics(&metrics, MetricGroup::Validation).await
    }

    /// Stored reports of one group for a trial, in insertion order.
    pub async fn trial_metrics(&self, trial_id: i32, group: MetricGroup) -> HarnessResult<Vec<MetricReport>> {
        let rows = sqlx::query(
            r#"
            SELECT id, trial_id, trial_run_id, total_batches, metrics
            FROM metrics
            WHERE trial_id = $1 AND metric_group = $2
            ORDER BY id
            "#,
        )
        .bind(trial_id)
        .bind(group)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> HarnessResult<MetricReport> {
                let Json(metrics): Json<Metrics> = row.try_get("metrics")?;
                Ok(MetricReport {
                    id: row.try_get("id")?,
                    trial_id: row.try_get("trial_id")?,
                    trial_run_id: row.try_get("trial_run_id")?,
                    total_batches: row.try_get("total_batches")?,
                    metrics,
                })
            })
            .collect()
    }
}
