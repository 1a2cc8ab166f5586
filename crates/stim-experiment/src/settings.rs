use std::time::Duration;

use stim_model::{ConfigError, ResourceSpec};
use stim_session::ConfigSource;

/// 60 Hz.
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(16);

/// Settings of an [`Experiment`](crate::Experiment) run.
#[derive(Debug, Clone)]
pub struct ExperimentSettings {
    /// Name used when no remote configuration provides one.
    pub name: String,
    pub source: ConfigSource,
    /// Resources to download at start; empty on a server run means the session manifest.
    pub resources: Vec<ResourceSpec>,
    /// Interval between two flow ticks.
    pub frame_period: Duration,
    /// Leave the flow idle until [`Experiment::run`](crate::Experiment::run) is called.
    pub defer_start: bool,
    pub completion_url: Option<String>,
    pub cancellation_url: Option<String>,
}

impl ExperimentSettings {
    pub fn new(name: impl Into<String>, source: ConfigSource) -> Self {
        Self {
            name: name.into(),
            source,
            resources: Vec::new(),
            frame_period: DEFAULT_FRAME_PERIOD,
            defer_start: false,
            completion_url: None,
            cancellation_url: None,
        }
    }

    pub fn with_resources(mut self, resources: Vec<ResourceSpec>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_frame_period(mut self, period: Duration) -> Self {
        self.frame_period = period;
        self
    }

    pub fn with_defer_start(mut self, defer: bool) -> Self {
        self.defer_start = defer;
        self
    }

    pub fn with_completion_url(mut self, url: impl Into<String>) -> Self {
        self.completion_url = Some(url.into());
        self
    }

    pub fn with_cancellation_url(mut self, url: impl Into<String>) -> Self {
        self.cancellation_url = Some(url.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyField { field: "name" });
        }
        if self.frame_period.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "frame_period",
                reason: "must be greater than zero",
            });
        }
        if self.source.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}
