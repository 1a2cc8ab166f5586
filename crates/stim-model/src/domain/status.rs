use serde::{Deserialize, Serialize};

/// Lifecycle of the remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    Unconfigured,
    Configuring,
    Configured,
    Open,
    Closing,
    Closed,
    Error,
}

impl SessionStatus {
    /// Returns `true` if `next` is a legal successor of `self`.
    ///
    /// `Error` is reachable from any state; every other transition moves one step forward.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus as S;
        if next == S::Error {
            return true;
        }
        matches!(
            (self, next),
            (S::Unconfigured, S::Configuring)
                | (S::Configuring, S::Configured)
                | (S::Configured, S::Open)
                | (S::Configured, S::Closed)
                | (S::Open, S::Closing)
                | (S::Closing, S::Closed)
        )
    }
}

/// Status of the experiment as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExperimentStatus {
    #[default]
    NotConfigured,
    Configuring,
    Configured,
    Started,
    Paused,
    /// Ended before completion (participant or flow quit early).
    Stopped,
    /// Ended after completing the flow.
    Finished,
    Error,
}

impl ExperimentStatus {
    /// Returns `true` if the experiment won't transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExperimentStatus::Stopped | ExperimentStatus::Finished | ExperimentStatus::Error
        )
    }

    /// Returns `true` while the flow is allowed to tick (possibly paused).
    pub fn is_running(&self) -> bool {
        matches!(self, ExperimentStatus::Started | ExperimentStatus::Paused)
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: ExperimentStatus) -> bool {
        use ExperimentStatus as E;
        if self.is_terminal() {
            return false;
        }
        if next == E::Error {
            return true;
        }
        matches!(
            (self, next),
            (E::NotConfigured, E::Configuring)
                | (E::Configuring, E::Configured)
                | (E::Configured, E::Started)
                | (E::Configured, E::Stopped)
                | (E::Configured, E::Finished)
                | (E::Started, E::Paused)
                | (E::Paused, E::Started)
                | (E::Started, E::Stopped)
                | (E::Started, E::Finished)
                | (E::Paused, E::Stopped)
                | (E::Paused, E::Finished)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_reachable_from_anywhere() {
        for status in [
            SessionStatus::Unconfigured,
            SessionStatus::Configured,
            SessionStatus::Open,
            SessionStatus::Closed,
        ] {
            assert!(status.can_transition_to(SessionStatus::Error));
        }
    }

    #[test]
    fn session_cannot_skip_closing() {
        assert!(SessionStatus::Open.can_transition_to(SessionStatus::Closing));
        assert!(!SessionStatus::Open.can_transition_to(SessionStatus::Closed));
        assert!(!SessionStatus::Closed.can_transition_to(SessionStatus::Open));
    }

    #[test]
    fn experiment_pause_resume() {
        assert!(ExperimentStatus::Started.can_transition_to(ExperimentStatus::Paused));
        assert!(ExperimentStatus::Paused.can_transition_to(ExperimentStatus::Started));
        assert!(!ExperimentStatus::Configured.can_transition_to(ExperimentStatus::Paused));
    }

    #[test]
    fn experiment_terminal_states_are_final() {
        assert!(ExperimentStatus::Finished.is_terminal());
        assert!(!ExperimentStatus::Finished.can_transition_to(ExperimentStatus::Error));
        assert!(!ExperimentStatus::Error.can_transition_to(ExperimentStatus::Started));
        assert!(ExperimentStatus::Configuring.can_transition_to(ExperimentStatus::Error));
    }
}
