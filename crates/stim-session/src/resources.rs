use std::time::Duration;

use reqwest::Url;
use stim_core::ResourceRegistry;
use stim_model::{ResourceSpec, ResourceStatus};
use tracing::{debug, info, warn};

use crate::errors::SessionError;
use crate::manager::{SessionManager, check, endpoint};

impl SessionManager {
    /// Declare resources and start downloading them in the background.
    ///
    /// Returns immediately; progress is observed through the registry. With an empty list a
    /// server run fetches the resource manifest of its session, a local run has nothing to
    /// download. Failures are recorded per resource and never returned.
    pub fn prepare_resources(&self, resources: Vec<ResourceSpec>) {
        let (source, manifest) = {
            let state = self.read();
            let Some(source) = state.source.clone() else {
                warn!("resources requested before the session was configured");
                return;
            };
            let manifest = match (&state.config, &state.token) {
                (Some(config), Some(token)) if config.is_server() => Some(endpoint(
                    config.session_url.as_deref().unwrap_or_default(),
                    &format!("sessions/{token}/resources"),
                )),
                _ => None,
            };
            (source, manifest)
        };
        let timeout = Duration::from_millis(source.request_timeout_ms);

        if !resources.is_empty() {
            info!(count = resources.len(), "preparing resources");
            for spec in resources {
                let url = source.resource_location(&spec.path);
                self.spawn_download(spec, url, timeout);
            }
            return;
        }

        let Some(manifest) = manifest else {
            debug!("no resources declared");
            return;
        };

        self.registry.set_manifest_pending(true);
        let http = self.http.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            match fetch_manifest(&http, &manifest, timeout).await {
                Ok(specs) => {
                    info!(count = specs.len(), "resource manifest received");
                    let jobs: Vec<_> = specs
                        .into_iter()
                        .filter(|spec| registry.register(spec))
                        .map(|spec| {
                            let url = source.resource_location(&spec.path);
                            (spec, url)
                        })
                        .collect();
                    registry.set_manifest_pending(false);
                    for (spec, url) in jobs {
                        tokio::spawn(download(http.clone(), registry.clone(), spec.name, url, timeout));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to fetch resource manifest");
                    registry.set_manifest_pending(false);
                }
            }
        });
    }

    fn spawn_download(&self, spec: ResourceSpec, url: Result<Url, SessionError>, timeout: Duration) {
        if !self.registry.register(&spec) {
            debug!(resource = %spec.name, "resource already declared");
            return;
        }
        tokio::spawn(download(
            self.http.clone(),
            self.registry.clone(),
            spec.name,
            url,
            timeout,
        ));
    }
}

async fn fetch_manifest(
    http: &reqwest::Client,
    manifest: &str,
    timeout: Duration,
) -> Result<Vec<ResourceSpec>, SessionError> {
    let response = http.get(manifest).timeout(timeout).send().await?;
    let body = check(response, "fetch resource manifest").await?.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| SessionError::MalformedConfig(format!("resource manifest: {e}")))
}

async fn download(
    http: reqwest::Client,
    registry: ResourceRegistry,
    name: String,
    url: Result<Url, SessionError>,
    timeout: Duration,
) {
    registry.update_status(&name, ResourceStatus::Downloading, None);

    let fetched = match url {
        Ok(url) => fetch(&http, &name, url, timeout).await,
        Err(e) => Err(e),
    };
    match fetched {
        Ok(bytes) => {
            debug!(resource = %name, size = bytes.len(), "resource downloaded");
            registry.complete(&name, bytes);
        }
        Err(e) => {
            warn!(resource = %name, error = %e, "resource download failed");
            registry.fail(&name, e.to_string());
        }
    }
}

async fn fetch(
    http: &reqwest::Client,
    name: &str,
    url: Url,
    timeout: Duration,
) -> Result<Vec<u8>, SessionError> {
    if url.scheme() == "file" {
        let path = url.to_file_path().map_err(|_| SessionError::Resource {
            name: name.to_string(),
            reason: format!("not a local path: {url}"),
        })?;
        return Ok(tokio::fs::read(&path).await?);
    }

    let response = http.get(url).timeout(timeout).send().await?;
    let bytes = check(response, "download resource").await?.bytes().await?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stim_core::{ManualClock, Readiness};

    use super::*;
    use crate::ConfigSource;

    async fn wait_ready(registry: &ResourceRegistry) -> Readiness {
        for _ in 0..200 {
            let readiness = registry.poll(&[]);
            if matches!(readiness, Readiness::Ready { .. }) {
                return readiness;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        registry.poll(&[])
    }

    #[tokio::test]
    async fn local_files_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("words.txt"), b"red\ngreen").unwrap();

        let manager = SessionManager::new(Arc::new(ManualClock::new())).unwrap();
        manager
            .configure(ConfigSource::local_dir(dir.path()).unwrap(), "stroop")
            .await
            .unwrap();
        manager.prepare_resources(vec![
            ResourceSpec::new("words", "words.txt"),
            ResourceSpec::new("absent", "absent.txt"),
        ]);

        let readiness = wait_ready(manager.registry()).await;
        assert_eq!(
            readiness,
            Readiness::Ready {
                failed: vec!["absent".to_string()],
                missing: vec![]
            }
        );
        assert_eq!(
            manager.registry().payload("words").as_deref(),
            Some(&b"red\ngreen"[..])
        );
    }

    #[tokio::test]
    async fn empty_local_list_downloads_nothing() {
        let manager = SessionManager::new(Arc::new(ManualClock::new())).unwrap();
        manager
            .configure(ConfigSource::parse("file:///tmp/x/index.html").unwrap(), "x")
            .await
            .unwrap();
        manager.prepare_resources(vec![]);

        assert!(manager.registry().is_empty());
        assert!(!manager.registry().manifest_pending());
    }

    #[tokio::test]
    async fn unconfigured_request_is_ignored() {
        let manager = SessionManager::new(Arc::new(ManualClock::new())).unwrap();
        manager.prepare_resources(vec![ResourceSpec::new("a", "a.png")]);
        assert!(manager.registry().is_empty());
    }
}
