//! Chained constructors for fixture options.

use chrono::{DateTime, Utc};
use intg_domain::{AllocationState, IntegrationsConfig, PachydermIntegration, State};
use intg_infrastructure::{AllocationOptions, CheckpointOptions, ExperimentOptions, UserOptions};

/// Builder for [`ExperimentOptions`].
#[derive(Default)]
pub struct ExperimentOptionsBuilder {
    options: ExperimentOptions,
}

impl ExperimentOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hyperparameters(mut self, names: &[&str]) -> Self {
        self.options.hyperparameter_names = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_project_id(mut self, project_id: i32) -> Self {
        self.options.project_id = Some(project_id);
        self
    }

    pub fn with_external_id(mut self, external_id: &str) -> Self {
        self.options.external_experiment_id = Some(external_id.to_string());
        self
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.options.state = Some(state);
        self
    }

    pub fn with_pachyderm(mut self, repo: &str, commit: &str) -> Self {
        self.options.integrations = Some(IntegrationsConfig {
            pachyderm: Some(PachydermIntegration {
                host: "localhost".to_string(),
                port: 80,
                project: "default".to_string(),
                repo: repo.to_string(),
                commit: commit.to_string(),
            }),
        });
        self
    }

    pub fn build(self) -> ExperimentOptions {
        self.options
    }
}

/// Builder for [`CheckpointOptions`].
#[derive(Default)]
pub struct CheckpointOptionsBuilder {
    options: CheckpointOptions,
}

impl CheckpointOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.options.steps_completed = Some(f64::from(steps));
        self
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.options.state = Some(state);
        self
    }

    pub fn with_report_time(mut self, report_time: DateTime<Utc>) -> Self {
        self.options.report_time = Some(report_time);
        self
    }

    pub fn with_resource(mut self, name: &str, size: i64) -> Self {
        self.options
            .resources
            .get_or_insert_with(Default::default)
            .insert(name.to_string(), size);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.options.extra_metadata.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> CheckpointOptions {
        self.options
    }
}

pub fn admin_user() -> UserOptions {
    UserOptions {
        admin: true,
        ..Default::default()
    }
}

pub fn allocation_in_state(sequence: u32, state: AllocationState) -> AllocationOptions {
    AllocationOptions {
        sequence: Some(sequence),
        state: Some(state),
        start_time: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_builder_accumulates_resources() {
        let options = CheckpointOptionsBuilder::new()
            .with_steps(3)
            .with_resource("model.pt", 100)
            .with_resource("state.json", 20)
            .build();

        assert_eq!(options.steps_completed, Some(3.0));
        assert_eq!(options.resources.as_ref().map(|r| r.len()), Some(2));
    }

    #[test]
    fn test_experiment_builder() {
        let options = ExperimentOptionsBuilder::new()
            .with_hyperparameters(&["lr"])
            .with_state(State::Paused)
            .build();
        assert_eq!(options.hyperparameter_names, Some(vec!["lr".to_string()]));
        assert_eq!(options.state, Some(State::Paused));
        assert_eq!(options.project_id, None);
    }
}
