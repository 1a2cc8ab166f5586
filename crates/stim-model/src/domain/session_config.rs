use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, NO_INTERVAL};

/// Where the run is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    /// No remote session; results are written to the local results directory.
    Local,
    /// Remote-backed run with an open session on the session service.
    Server,
}

/// Serialization format of uploaded results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    #[default]
    Csv,
    /// Tab-delimited text.
    Tsv,
    /// Structured JSON log.
    Json,
}

impl SaveFormat {
    /// File extension used for saved results.
    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Csv => "csv",
            SaveFormat::Tsv => "tsv",
            SaveFormat::Json => "json",
        }
    }
}

impl FromStr for SaveFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(SaveFormat::Csv),
            "tsv" | "text" | "delimited" => Ok(SaveFormat::Tsv),
            "json" => Ok(SaveFormat::Json),
            _ => Err(ConfigError::InvalidSaveFormat(s.to_string())),
        }
    }
}

/// Periodic upload bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsUpload {
    /// Upload period in minutes; `0` disables periodic uploads.
    #[serde(default)]
    pub period: u64,
    /// Identifier of the armed periodic timer, [`NO_INTERVAL`] when none is armed.
    #[serde(default = "no_interval")]
    pub interval_id: i64,
    /// Clock timestamp (ms) of the last successful upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_upload_timestamp: Option<u64>,
}

fn no_interval() -> i64 {
    NO_INTERVAL
}

impl ResultsUpload {
    pub fn with_period(period: u64) -> Self {
        Self {
            period,
            ..Self::default()
        }
    }

    pub fn period(&self) -> Option<Duration> {
        (self.period > 0).then(|| Duration::from_secs(self.period * 60))
    }

    pub fn is_armed(&self) -> bool {
        self.interval_id != NO_INTERVAL
    }
}

impl Default for ResultsUpload {
    fn default() -> Self {
        Self {
            period: 0,
            interval_id: NO_INTERVAL,
            last_upload_timestamp: None,
        }
    }
}

/// Experiment-level settings of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentInfo {
    pub name: String,
    pub full_path: String,
    #[serde(default)]
    pub save_format: SaveFormat,
    #[serde(default = "keep")]
    pub save_incomplete_results: bool,
    #[serde(default)]
    pub save_log: bool,
    #[serde(default)]
    pub results_upload: ResultsUpload,
}

fn keep() -> bool {
    true
}

/// Resolved configuration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub environment: Environment,
    pub experiment: ExperimentInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl SessionConfig {
    /// Local-only configuration with default save policy.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            environment: Environment::Local,
            experiment: ExperimentInfo {
                name: name.into(),
                full_path: ".".to_string(),
                save_format: SaveFormat::Csv,
                save_incomplete_results: true,
                save_log: false,
                results_upload: ResultsUpload::default(),
            },
            session_url: None,
            project_id: None,
        }
    }

    pub fn is_server(&self) -> bool {
        self.environment == Environment::Server
    }

    /// Check the configuration invariants.
    ///
    /// Every run needs an experiment name; a server run additionally needs
    /// the session service URL and the project identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.name.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                field: "experiment.name",
            });
        }
        if self.is_server() {
            if self.experiment.full_path.trim().is_empty() {
                return Err(ConfigError::EmptyField {
                    field: "experiment.fullPath",
                });
            }
            match self.session_url.as_deref() {
                None => return Err(ConfigError::MissingField("sessionURL")),
                Some(url) if url.trim().is_empty() => {
                    return Err(ConfigError::EmptyField { field: "sessionURL" });
                }
                Some(_) => {}
            }
            match self.project_id.as_deref() {
                None => return Err(ConfigError::MissingField("gitlab.projectId")),
                Some(id) if id.trim().is_empty() => {
                    return Err(ConfigError::EmptyField {
                        field: "gitlab.projectId",
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
