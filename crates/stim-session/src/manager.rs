use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stim_core::{Clock, ResourceRegistry};
use stim_model::{MessageBoard, SessionConfig, SessionStatus};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::ConfigSource;
use crate::errors::SessionError;
use crate::remote::RemoteConfig;
use crate::upload::{PeriodicUpload, join_periodic};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenRequest<'a> {
    project_id: &'a str,
    experiment_full_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pilot_token: Option<&'a str>,
}

#[derive(Deserialize)]
struct OpenResponse {
    token: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CloseRequest {
    is_completed: bool,
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) status: SessionStatus,
    pub(crate) source: Option<ConfigSource>,
    pub(crate) config: Option<SessionConfig>,
    pub(crate) board: MessageBoard,
    pub(crate) token: Option<String>,
}

/// Client side of a remote session.
///
/// Owns the resolved configuration, the session token and the resource registry.
/// Shared state sits behind short-lived locks that are never held across an `.await`,
/// so the manager can be used from flow steps and background tasks at once.
pub struct SessionManager {
    pub(crate) http: reqwest::Client,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) registry: ResourceRegistry,
    pub(crate) state: RwLock<SessionState>,
    /// Set by the first close request; later requests are no-ops.
    closing: AtomicBool,
    pub(crate) periodic: Mutex<Option<PeriodicUpload>>,
    pub(crate) next_interval_id: AtomicI64,
    /// Last background request; each one is sent after the one before it.
    outbox: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(clock: Arc<dyn Clock>) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_client(http, clock))
    }

    pub fn with_client(http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            clock,
            registry: ResourceRegistry::new(),
            state: RwLock::new(SessionState::default()),
            closing: AtomicBool::new(false),
            periodic: Mutex::new(None),
            next_interval_id: AtomicI64::new(1),
            outbox: Mutex::new(None),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn status(&self) -> SessionStatus {
        self.read().status
    }

    pub fn config(&self) -> Option<SessionConfig> {
        self.read().config.clone()
    }

    pub fn source(&self) -> Option<ConfigSource> {
        self.read().source.clone()
    }

    pub fn message_board(&self) -> MessageBoard {
        self.read().board.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.read().token.clone()
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Returns `true` once a close has been requested.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Run `work` in the background once every previously queued request is done.
    pub(crate) fn enqueue<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tail = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = tail.take();
        *tail = Some(tokio::spawn(async move {
            if let Some(previous) = previous
                && let Err(e) = previous.await
            {
                warn!(error = %e, "queued request aborted");
            }
            work.await;
        }));
    }

    /// Wait for every queued background request.
    pub(crate) async fn drain_outbox(&self) {
        let tail = self
            .outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tail) = tail
            && let Err(e) = tail.await
        {
            warn!(error = %e, "queued request aborted");
        }
    }

    pub(crate) fn set_status(&self, next: SessionStatus) {
        let mut state = self.write();
        if state.status.can_transition_to(next) {
            debug!(from = ?state.status, to = ?next, "session status changed");
            state.status = next;
        } else {
            warn!(from = ?state.status, to = ?next, "ignored illegal session transition");
        }
    }

    /// Resolve the run configuration.
    ///
    /// Runs launched from an approved host fetch the remote configuration document and
    /// become server runs; everything else becomes a local run named `fallback_name`.
    /// The message board is parsed from the run URL either way.
    #[instrument(level = "info", skip_all, fields(run_url = %source.run_url))]
    pub async fn configure(
        &self,
        source: ConfigSource,
        fallback_name: &str,
    ) -> Result<SessionConfig, SessionError> {
        {
            let mut state = self.write();
            if state.status != SessionStatus::Unconfigured {
                return Err(SessionError::InvalidState {
                    operation: "configure",
                    status: state.status,
                });
            }
            state.status = SessionStatus::Configuring;
        }

        let board = MessageBoard::from_query_pairs(source.run_url.query_pairs());
        let resolved = if source.is_approved_host() {
            self.fetch_remote_config(&source).await
        } else {
            debug!("run host is not approved, using local configuration");
            let config = SessionConfig::local(fallback_name);
            config.validate().map(|_| config).map_err(SessionError::from)
        };

        match resolved {
            Ok(config) => {
                let mut state = self.write();
                state.config = Some(config.clone());
                state.board = board;
                state.source = Some(source);
                state.status = SessionStatus::Configured;
                info!(
                    experiment = %config.experiment.name,
                    environment = ?config.environment,
                    "session configured"
                );
                Ok(config)
            }
            Err(e) => {
                warn!(error = %e, "session configuration failed");
                self.set_status(SessionStatus::Error);
                Err(e)
            }
        }
    }

    async fn fetch_remote_config(&self, source: &ConfigSource) -> Result<SessionConfig, SessionError> {
        let url = source.config_location()?;
        debug!(%url, "fetching remote configuration");

        let response = self
            .http
            .get(url)
            .timeout(Duration::from_millis(source.request_timeout_ms))
            .send()
            .await?;
        let body = check(response, "configure").await?.text().await?;

        RemoteConfig::parse(&body)?.into_session_config()
    }

    /// Open the remote session and return its token.
    ///
    /// Calling it again on an open session returns the existing token without a request.
    #[instrument(level = "info", skip(self))]
    pub async fn open_session(&self) -> Result<String, SessionError> {
        let (endpoint, body, timeout) = {
            let state = self.read();
            if state.status == SessionStatus::Open
                && let Some(token) = &state.token
            {
                return Ok(token.clone());
            }
            if state.status != SessionStatus::Configured {
                return Err(SessionError::InvalidState {
                    operation: "open session",
                    status: state.status,
                });
            }
            let (Some(config), Some(source)) = (&state.config, &state.source) else {
                return Err(SessionError::InvalidState {
                    operation: "open session",
                    status: state.status,
                });
            };
            if !config.is_server() {
                return Err(SessionError::LocalRun {
                    operation: "open session",
                });
            }
            let request = OpenRequest {
                project_id: config.project_id.as_deref().unwrap_or_default(),
                experiment_full_path: &config.experiment.full_path,
                pilot_token: state.board.pilot_token(),
            };
            let body = serde_json::to_value(&request)
                .map_err(|e| SessionError::MalformedConfig(e.to_string()))?;
            (
                endpoint(config.session_url.as_deref().unwrap_or_default(), "sessions"),
                body,
                Duration::from_millis(source.request_timeout_ms),
            )
        };

        match self.request_open(&endpoint, &body, timeout).await {
            Ok(opened) => {
                {
                    let mut state = self.write();
                    state.token = Some(opened.token.clone());
                }
                self.set_status(SessionStatus::Open);
                info!(status = ?opened.status, "session opened");
                Ok(opened.token)
            }
            Err(e) => {
                warn!(error = %e, "failed to open session");
                self.set_status(SessionStatus::Error);
                Err(e)
            }
        }
    }

    async fn request_open(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<OpenResponse, SessionError> {
        let response = self
            .http
            .post(endpoint)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let body = check(response, "open session").await?.text().await?;
        serde_json::from_str(&body).map_err(|e| SessionError::Rejected {
            operation: "open session",
            status: 200,
            body: format!("unreadable response ({e}): {body}"),
        })
    }

    /// Close the session, reporting whether the run completed.
    ///
    /// Only the first call has any effect. With `immediate` the request is queued behind
    /// pending background uploads and the session is considered closed right away;
    /// otherwise in-flight uploads finish before the request is sent. Local runs close
    /// without any request.
    #[instrument(level = "info", skip(self))]
    pub async fn close_session(&self, completed: bool, immediate: bool) -> Result<(), SessionError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            debug!("session close already requested");
            return Ok(());
        }
        let periodic = self.disarm_periodic();

        let target = {
            let state = self.read();
            match state.status {
                SessionStatus::Open => {
                    let (Some(config), Some(source), Some(token)) =
                        (&state.config, &state.source, &state.token)
                    else {
                        return Err(SessionError::InvalidState {
                            operation: "close session",
                            status: state.status,
                        });
                    };
                    Some((
                        endpoint(
                            config.session_url.as_deref().unwrap_or_default(),
                            &format!("sessions/{token}"),
                        ),
                        Duration::from_millis(source.request_timeout_ms),
                    ))
                }
                _ => None,
            }
        };

        let Some((endpoint, timeout)) = target else {
            if self.status() == SessionStatus::Configured {
                self.set_status(SessionStatus::Closed);
            }
            debug!(status = ?self.status(), "no open session, nothing to close");
            return Ok(());
        };

        self.set_status(SessionStatus::Closing);
        let request = self
            .http
            .delete(endpoint)
            .timeout(timeout)
            .json(&CloseRequest {
                is_completed: completed,
            });

        if immediate {
            if let Some(task) = periodic {
                self.enqueue(join_periodic(task));
            }
            self.enqueue(async move {
                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!("background session close delivered")
                    }
                    Ok(response) => {
                        warn!(status = %response.status(), "background session close rejected")
                    }
                    Err(e) => warn!(error = %e, "background session close failed"),
                }
            });
            self.set_status(SessionStatus::Closed);
            info!(completed, "session close dispatched");
            return Ok(());
        }

        if let Some(task) = periodic {
            join_periodic(task).await;
        }
        self.drain_outbox().await;
        let result = match request.send().await {
            Ok(response) => check(response, "close session").await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => {
                self.set_status(SessionStatus::Closed);
                info!(completed, "session closed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to close session");
                self.set_status(SessionStatus::Error);
                Err(e)
            }
        }
    }

    /// Drop the resolved configuration and token once the run is over.
    pub fn release(&self) {
        drop(self.disarm_periodic());
        let mut state = self.write();
        state.config = None;
        state.token = None;
    }
}

/// Join a service base URL and a relative path.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Map non-success responses to [`SessionError::Rejected`].
pub(crate) async fn check(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, SessionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SessionError::Rejected {
        operation,
        status: status.as_u16(),
        body,
    })
}
