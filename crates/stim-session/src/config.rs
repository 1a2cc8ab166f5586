use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::errors::SessionError;

const DEFAULT_APPROVED_HOSTS: [&str; 2] = ["pavlovia.org", "run.pavlovia.org"];
const DEFAULT_RESULTS_DIR: &str = "data";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const CONFIG_FILE: &str = "config.json";

/// Where a run comes from and where its configuration lives.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// URL the run was launched from; its query carries participant info and `__` flags.
    pub run_url: Url,
    /// Remote configuration document. Defaults to `config.json` next to `run_url`.
    pub config_url: Option<Url>,
    /// Base for relative resource paths. Defaults to `run_url`.
    pub resource_base: Option<Url>,
    /// Hosts whose runs are server-backed; subdomains match too.
    pub approved_hosts: Vec<String>,
    /// Directory receiving results of local runs.
    pub results_dir: PathBuf,
    pub request_timeout_ms: u64,
}

impl ConfigSource {
    pub fn new(run_url: Url) -> Self {
        Self {
            run_url,
            config_url: None,
            resource_base: None,
            approved_hosts: DEFAULT_APPROVED_HOSTS.iter().map(|h| h.to_string()).collect(),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    pub fn parse(run_url: &str) -> Result<Self, SessionError> {
        let url = Url::parse(run_url)
            .map_err(|e| SessionError::MalformedConfig(format!("run url `{run_url}`: {e}")))?;
        Ok(Self::new(url))
    }

    /// Source for a run launched from a local directory.
    pub fn local_dir(dir: &Path) -> Result<Self, SessionError> {
        let url = Url::from_directory_path(dir).map_err(|_| {
            SessionError::MalformedConfig(format!("not an absolute directory: {}", dir.display()))
        })?;
        Ok(Self::new(url))
    }

    pub fn with_config_url(mut self, url: Url) -> Self {
        self.config_url = Some(url);
        self
    }

    pub fn with_resource_base(mut self, url: Url) -> Self {
        self.resource_base = Some(url);
        self
    }

    pub fn with_approved_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approved_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    /// Returns `true` when the run URL host is approved for server-backed runs.
    pub fn is_approved_host(&self) -> bool {
        let Some(host) = self.run_url.host_str() else {
            return false;
        };
        self.approved_hosts
            .iter()
            .any(|approved| host == approved || host.ends_with(&format!(".{approved}")))
    }

    pub fn config_location(&self) -> Result<Url, SessionError> {
        match &self.config_url {
            Some(url) => Ok(url.clone()),
            None => self.run_url.join(CONFIG_FILE).map_err(|e| {
                SessionError::MalformedConfig(format!("cannot derive configuration url: {e}"))
            }),
        }
    }

    /// Resolve a resource path: absolute URLs are kept, relative paths join the resource base.
    pub fn resource_location(&self, path: &str) -> Result<Url, SessionError> {
        if let Ok(url) = Url::parse(path) {
            return Ok(url);
        }
        let base = self.resource_base.as_ref().unwrap_or(&self.run_url);
        base.join(path).map_err(|e| SessionError::Resource {
            name: path.to_string(),
            reason: format!("cannot resolve against `{base}`: {e}"),
        })
    }

    /// Value of a plain (non `__`) query parameter of the run URL.
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.run_url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_host_matches_subdomains() {
        let source = ConfigSource::parse("https://run.pavlovia.org/lab/stroop/").unwrap();
        assert!(source.is_approved_host());

        let source = ConfigSource::parse("https://eu.run.pavlovia.org/lab/").unwrap();
        assert!(source.is_approved_host());

        let source = ConfigSource::parse("https://notpavlovia.org/lab/").unwrap();
        assert!(!source.is_approved_host());
    }

    #[test]
    fn local_file_runs_are_not_approved() {
        let source = ConfigSource::parse("file:///tmp/stroop/index.html").unwrap();
        assert!(!source.is_approved_host());
    }

    #[test]
    fn config_defaults_next_to_run_url() {
        let source = ConfigSource::parse("https://run.pavlovia.org/lab/stroop/index.html?x=1").unwrap();
        assert_eq!(
            source.config_location().unwrap().as_str(),
            "https://run.pavlovia.org/lab/stroop/config.json"
        );
    }

    #[test]
    fn resource_paths_resolve_against_base() {
        let source = ConfigSource::parse("https://run.pavlovia.org/lab/stroop/")
            .unwrap()
            .with_resource_base(Url::parse("https://cdn.example.org/stroop/").unwrap());

        assert_eq!(
            source.resource_location("img/red.png").unwrap().as_str(),
            "https://cdn.example.org/stroop/img/red.png"
        );
        assert_eq!(
            source
                .resource_location("https://other.example.org/a.wav")
                .unwrap()
                .as_str(),
            "https://other.example.org/a.wav"
        );
    }

    #[test]
    fn query_param_reads_participant() {
        let source =
            ConfigSource::parse("https://run.pavlovia.org/lab/?participant=p07&__noOutput").unwrap();
        assert_eq!(source.query_param("participant").as_deref(), Some("p07"));
        assert!(source.query_param("session").is_none());
    }
}
