use serde::{Deserialize, Serialize};

/// Outcome of one invocation of a scheduled step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlSignal {
    /// Keep the step at the head of its queue and invoke it again on the next tick.
    Continue,
    /// The step is done; advance to the following task.
    Next,
    /// Abort the queue and every enclosing queue.
    Stop,
}

impl ControlSignal {
    /// Returns `true` if the signal removes the step from its queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ControlSignal::Next | ControlSignal::Stop)
    }
}
