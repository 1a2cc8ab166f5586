use serde::{Deserialize, Serialize};

/// Kind of lifecycle event emitted by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    // configuration
    Configured,
    ConfigurationFailed,

    // session
    SessionOpened,
    SessionClosed,
    SessionCloseFailed,

    // resources
    ResourcesRequested,
    ResourceUnavailable,

    // uploads
    ResultsSaved,
    UploadSkipped,
    UploadFailed,

    // flow
    FlowStarted,
    FlowPaused,
    FlowResumed,
    FlowFinished,
    FlowFailed,

    // termination
    QuitRequested,
    AbruptClose,
}

/// One entry of the run's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub kind: EventKind,
    /// Task, resource or operation the event refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Monotonic clock timestamp in milliseconds.
    pub at_ms: u64,
}

impl Event {
    pub fn new(kind: EventKind, at_ms: u64) -> Self {
        Self {
            kind,
            task: None,
            reason: None,
            at_ms,
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
