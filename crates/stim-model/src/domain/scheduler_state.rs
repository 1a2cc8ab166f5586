use serde::{Deserialize, Serialize};

/// Lifecycle of a single task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerState {
    #[default]
    NotStarted,
    Running,
    Stopped,
}
