//! Typed metric report payloads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Metric name to averaged value.
    pub avg_metrics: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batch_metrics: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// A metric report for one trial run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialMetrics {
    pub trial_id: i32,
    pub trial_run_id: i32,
    pub steps_completed: i32,
    pub metrics: Metrics,
}

impl TrialMetrics {
    pub fn new(trial_id: i32, steps_completed: i32) -> Self {
        Self {
            trial_id,
            trial_run_id: 0,
            steps_completed,
            metrics: Metrics::default(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics
            .avg_metrics
            .insert(name.into(), serde_json::json!(value));
        self
    }

    pub fn with_run_id(mut self, trial_run_id: i32) -> Self {
        self.trial_run_id = trial_run_id;
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.avg_metrics.get(name).and_then(|v| v.as_f64())
    }
}

/// A stored metric report as read back from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub id: i64,
    pub trial_id: i32,
    pub trial_run_id: i32,
    pub total_batches: i32,
    pub metrics: Metrics,
}

impl MetricReport {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.avg_metrics.get(name).and_then(|v| v.as_f64())
    }
}
