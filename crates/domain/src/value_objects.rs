//! Identifiers and state enums shared by every fixture entity.

use std::fmt;
use std::str::FromStr;

use intg_core::{random_bytes, RandomSource};
use intg_errors::HarnessError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Random (v4) UUID drawn from the given source.
pub fn random_uuid(source: &dyn RandomSource) -> Uuid {
    uuid::Builder::from_random_bytes(random_bytes::<16>(source)).into_uuid()
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Opaque, globally unique job identifier.
    JobId
);
string_id!(
    /// Opaque, globally unique task identifier.
    TaskId
);
string_id!(
    /// `<task id>-<sequence>`.
    AllocationId
);
string_id!(RequestId);

impl JobId {
    pub fn generate(source: &dyn RandomSource) -> Self {
        Self(random_uuid(source).to_string())
    }
}

impl TaskId {
    pub fn generate(source: &dyn RandomSource) -> Self {
        Self(random_uuid(source).to_string())
    }
}

impl RequestId {
    pub fn generate(source: &dyn RandomSource) -> Self {
        Self(random_uuid(source).to_string())
    }
}

impl AllocationId {
    pub fn for_task(task_id: &TaskId, sequence: u32) -> Self {
        Self(format!("{task_id}-{sequence}"))
    }
}

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = HarnessError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(HarnessError::validation_error(format!(
                        concat!("invalid ", stringify!($name), ": {}"),
                        s
                    ))),
                }
            }
        }
    };
}

text_enum!(
    /// Run state shared by experiments, trials and checkpoints.
    State {
        Active => "ACTIVE",
        Paused => "PAUSED",
        StoppingCompleted => "STOPPING_COMPLETED",
        StoppingCanceled => "STOPPING_CANCELED",
        StoppingError => "STOPPING_ERROR",
        Completed => "COMPLETED",
        Canceled => "CANCELED",
        Error => "ERROR",
        Deleted => "DELETED",
    }
);

text_enum!(JobType {
    Experiment => "EXPERIMENT",
    Notebook => "NOTEBOOK",
    Shell => "SHELL",
    Command => "COMMAND",
    Tensorboard => "TENSORBOARD",
    CheckpointGc => "CHECKPOINT_GC",
    Generic => "GENERIC",
});

text_enum!(TaskType {
    Trial => "TRIAL",
    Notebook => "NOTEBOOK",
    Shell => "SHELL",
    Command => "COMMAND",
    Tensorboard => "TENSORBOARD",
    CheckpointGc => "CHECKPOINT_GC",
    Generic => "GENERIC",
});

text_enum!(AllocationState {
    Pending => "PENDING",
    Assigned => "ASSIGNED",
    Pulling => "PULLING",
    Starting => "STARTING",
    Running => "RUNNING",
    Terminating => "TERMINATING",
    Terminated => "TERMINATED",
});

text_enum!(
    /// Which stream a metric report belongs to.
    MetricGroup {
        Training => "training",
        Validation => "validation",
    }
);

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Completed | State::Canceled | State::Error | State::Deleted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intg_core::OsRandomSource;

    #[test]
    fn test_allocation_id_convention() {
        let task_id = TaskId::from("8c1d");
        assert_eq!(AllocationId::for_task(&task_id, 1).as_str(), "8c1d-1");
        assert_eq!(AllocationId::for_task(&task_id, 12).as_str(), "8c1d-12");
    }

    #[test]
    fn test_generated_ids_are_fresh() {
        let a = JobId::generate(&OsRandomSource);
        let b = JobId::generate(&OsRandomSource);
        assert_ne!(a, b);
        assert_eq!(Uuid::parse_str(a.as_str()).unwrap().get_version_num(), 4);
    }

    #[test]
    fn test_state_text_round_trip() {
        assert_eq!("STOPPING_COMPLETED".parse::<State>().unwrap(), State::StoppingCompleted);
        assert_eq!(AllocationState::Terminated.as_str(), "TERMINATED");
        assert!("active".parse::<State>().is_err());
        assert_eq!(
            serde_json::to_string(&MetricGroup::Validation).unwrap(),
            "\"validation\""
        );
    }
}
