//! Wire shape of the remote configuration document.

use serde::Deserialize;
use serde_json::Value;
use stim_model::{ConfigError, Environment, ExperimentInfo, ResultsUpload, SaveFormat, SessionConfig};

use crate::errors::SessionError;

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteConfig {
    experiment: Option<RemoteExperiment>,
    gitlab: Option<RemoteGitlab>,
    #[serde(rename = "psychoJsManager", alias = "pavlovia")]
    service: Option<RemoteService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteExperiment {
    name: Option<String>,
    #[serde(alias = "fullpath")]
    full_path: Option<String>,
    save_format: Option<String>,
    save_incomplete_results: Option<bool>,
    save_log: Option<bool>,
    results_upload: Option<RemoteUpload>,
}

#[derive(Debug, Deserialize)]
struct RemoteUpload {
    #[serde(default)]
    period: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteGitlab {
    project_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RemoteService {
    #[serde(rename = "URL")]
    url: Option<String>,
}

impl RemoteConfig {
    pub(crate) fn parse(body: &str) -> Result<Self, SessionError> {
        serde_json::from_str(body).map_err(|e| SessionError::MalformedConfig(e.to_string()))
    }

    /// Turn the document into a server configuration, checking required fields.
    pub(crate) fn into_session_config(self) -> Result<SessionConfig, SessionError> {
        let experiment = self
            .experiment
            .ok_or(ConfigError::MissingField("experiment"))?;
        let name = experiment
            .name
            .ok_or(ConfigError::MissingField("experiment.name"))?;
        let full_path = experiment
            .full_path
            .ok_or(ConfigError::MissingField("experiment.fullPath"))?;

        let project_id = match self.gitlab.and_then(|g| g.project_id) {
            None | Some(Value::Null) => return Err(ConfigError::MissingField("gitlab.projectId").into()),
            Some(Value::String(id)) => id,
            Some(Value::Number(id)) => id.to_string(),
            Some(other) => {
                return Err(SessionError::MalformedConfig(format!(
                    "gitlab.projectId must be a string or a number, got {other}"
                )));
            }
        };

        let session_url = self
            .service
            .ok_or(ConfigError::MissingField("psychoJsManager"))?
            .url
            .ok_or(ConfigError::MissingField("psychoJsManager.URL"))?;

        let save_format = match experiment.save_format.as_deref() {
            Some(raw) => raw.parse::<SaveFormat>()?,
            None => SaveFormat::default(),
        };

        let config = SessionConfig {
            environment: Environment::Server,
            experiment: ExperimentInfo {
                name,
                full_path,
                save_format,
                save_incomplete_results: experiment.save_incomplete_results.unwrap_or(true),
                save_log: experiment.save_log.unwrap_or(false),
                results_upload: ResultsUpload::with_period(
                    experiment.results_upload.map(|u| u.period).unwrap_or(0),
                ),
            },
            session_url: Some(session_url),
            project_id: Some(project_id),
        };
        config.validate()?;
        Ok(config)
    }
}
