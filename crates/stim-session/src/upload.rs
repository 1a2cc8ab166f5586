use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use stim_model::{
    Event, MessageBoard, NO_INTERVAL, ResultsTable, SaveFormat, SessionConfig, SessionStatus,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ConfigSource;
use crate::errors::SessionError;
use crate::manager::{SessionManager, check, endpoint};

/// Results table shared between flow steps and the periodic uploader.
pub type SharedResults = Arc<Mutex<ResultsTable>>;

/// How an upload request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Wait for the service to acknowledge the upload.
    #[default]
    Awaited,
    /// Sent in the background after earlier background requests, for when the run is
    /// being torn down. Nothing waits for the answer.
    Beacon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// The run is still in progress.
    pub partial: bool,
    /// Upload even if the previous upload is recent.
    pub bypass_throttle: bool,
    pub transport: Transport,
}

impl UploadOptions {
    /// Periodic save of a run in progress; subject to throttling.
    pub fn incremental() -> Self {
        Self {
            partial: true,
            bypass_throttle: false,
            transport: Transport::Awaited,
        }
    }

    /// Final save at the end of a run.
    pub fn final_save() -> Self {
        Self {
            partial: false,
            bypass_throttle: true,
            transport: Transport::Awaited,
        }
    }

    /// Last-chance save during an abrupt close.
    pub fn beacon() -> Self {
        Self {
            partial: false,
            bypass_throttle: true,
            transport: Transport::Beacon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Acknowledged by the session service.
    Uploaded,
    /// Written to a local file.
    Written(PathBuf),
    /// Sent without waiting for an answer.
    Dispatched,
    /// Skipped because the previous upload is too recent.
    Throttled,
    /// Saving is disabled for this run.
    Suppressed,
    /// Nothing recorded yet.
    Empty,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultsEnvelope<'a> {
    key: &'a str,
    value: &'a str,
    save_format: SaveFormat,
    is_partial: bool,
}

/// Armed periodic upload: the timer task and the token that stops it.
pub(crate) struct PeriodicUpload {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Wait for a disarmed periodic upload to finish its in-flight request.
pub(crate) async fn join_periodic(task: JoinHandle<()>) {
    if let Err(e) = task.await {
        warn!(error = %e, "periodic upload task aborted");
    }
}

struct UploadTarget {
    status: SessionStatus,
    config: SessionConfig,
    source: ConfigSource,
    board: MessageBoard,
    token: Option<String>,
}

/// File name of saved results: `{participant}_{experiment}_{date}.{extension}`.
pub fn results_key(config: &SessionConfig, results: &ResultsTable, extension: &str) -> String {
    let participant = results.extra_info("participant").unwrap_or("anonymous");
    let date = results.extra_info("date").unwrap_or("undated");
    let key = format!("{participant}_{}_{date}.{extension}", config.experiment.name);
    key.replace(['/', '\\', ':'], "-")
}

impl SessionManager {
    /// Save the results table.
    ///
    /// Server runs post it to the open session, local runs write it under the results
    /// directory. Non-bypassed uploads are skipped while the previous upload is younger
    /// than half the configured upload period.
    #[instrument(level = "debug", skip(self, results), fields(partial = options.partial))]
    pub async fn upload_results(
        &self,
        results: &ResultsTable,
        options: UploadOptions,
    ) -> Result<UploadOutcome, SessionError> {
        let target = self.upload_target("upload results")?;

        if target.board.no_output() {
            debug!("output disabled for this run");
            return Ok(UploadOutcome::Suppressed);
        }
        if results.is_empty() {
            debug!("no results recorded");
            return Ok(UploadOutcome::Empty);
        }
        if !options.partial
            && results.is_finished()
            && !results.is_completed()
            && !target.config.experiment.save_incomplete_results
        {
            debug!("incomplete results are not saved for this experiment");
            return Ok(UploadOutcome::Suppressed);
        }
        if !options.bypass_throttle && self.throttled(&target.config) {
            debug!("previous upload too recent");
            return Ok(UploadOutcome::Throttled);
        }

        let format = target.config.experiment.save_format;
        let key = results_key(&target.config, results, format.extension());
        let value = results.serialize(format);

        let outcome = self
            .deliver(&target, &key, &value, format, options)
            .await?;
        self.mark_uploaded();
        info!(%key, ?outcome, "results saved");
        Ok(outcome)
    }

    /// Save the run's event log next to the results, when the experiment asks for it.
    #[instrument(level = "debug", skip_all)]
    pub async fn upload_log(
        &self,
        results: &ResultsTable,
        events: &[Event],
    ) -> Result<UploadOutcome, SessionError> {
        let target = self.upload_target("upload log")?;
        if target.board.no_output() || !target.config.experiment.save_log {
            return Ok(UploadOutcome::Suppressed);
        }
        let key = results_key(&target.config, results, "log.json");
        let value = serde_json::to_string(events).map_err(|e| SessionError::Upload(e.to_string()))?;

        self.deliver(&target, &key, &value, SaveFormat::Json, UploadOptions::final_save())
            .await
    }

    fn upload_target(&self, operation: &'static str) -> Result<UploadTarget, SessionError> {
        let state = self.read();
        match (&state.config, &state.source) {
            (Some(config), Some(source)) => Ok(UploadTarget {
                status: state.status,
                config: config.clone(),
                source: source.clone(),
                board: state.board.clone(),
                token: state.token.clone(),
            }),
            _ => Err(SessionError::InvalidState {
                operation,
                status: state.status,
            }),
        }
    }

    fn throttled(&self, config: &SessionConfig) -> bool {
        let upload = &config.experiment.results_upload;
        match (upload.period(), upload.last_upload_timestamp) {
            (Some(period), Some(last)) => {
                let elapsed = self.now_ms().saturating_sub(last);
                u128::from(elapsed) < period.as_millis() / 2
            }
            _ => false,
        }
    }

    fn mark_uploaded(&self) {
        let now = self.now_ms();
        if let Some(config) = self.write().config.as_mut() {
            config.experiment.results_upload.last_upload_timestamp = Some(now);
        }
    }

    async fn deliver(
        &self,
        target: &UploadTarget,
        key: &str,
        value: &str,
        format: SaveFormat,
        options: UploadOptions,
    ) -> Result<UploadOutcome, SessionError> {
        if !target.config.is_server() {
            let dir = &target.source.results_dir;
            tokio::fs::create_dir_all(dir).await?;
            let path = dir.join(key);
            tokio::fs::write(&path, value).await?;
            return Ok(UploadOutcome::Written(path));
        }

        let Some(token) = &target.token else {
            return Err(SessionError::InvalidState {
                operation: "upload results",
                status: target.status,
            });
        };
        let url = endpoint(
            target.config.session_url.as_deref().unwrap_or_default(),
            &format!("sessions/{token}/results"),
        );
        let request = self
            .http
            .post(url)
            .timeout(Duration::from_millis(target.source.request_timeout_ms))
            .json(&ResultsEnvelope {
                key,
                value,
                save_format: format,
                is_partial: options.partial,
            });

        match options.transport {
            Transport::Beacon => {
                if let Some(task) = self.disarm_periodic() {
                    self.enqueue(join_periodic(task));
                }
                self.enqueue(async move {
                    match request.send().await {
                        Ok(response) if response.status().is_success() => {
                            debug!("beacon upload delivered")
                        }
                        Ok(response) => {
                            warn!(status = %response.status(), "beacon upload rejected")
                        }
                        Err(e) => warn!(error = %e, "beacon upload failed"),
                    }
                });
                Ok(UploadOutcome::Dispatched)
            }
            Transport::Awaited => {
                let response = request.send().await?;
                check(response, "upload results").await?;
                Ok(UploadOutcome::Uploaded)
            }
        }
    }

    /// Start uploading `results` every configured period.
    ///
    /// Returns the interval id, or [`NO_INTERVAL`] when the period is zero. Arming an
    /// already armed upload returns the existing id.
    pub fn arm_periodic_upload(self: &Arc<Self>, results: SharedResults) -> i64 {
        let Some(period) = self
            .read()
            .config
            .as_ref()
            .and_then(|c| c.experiment.results_upload.period())
        else {
            return NO_INTERVAL;
        };
        self.arm_every(results, period)
    }

    pub(crate) fn arm_every(self: &Arc<Self>, results: SharedResults, period: Duration) -> i64 {
        let mut slot = self.periodic.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return self.interval_id();
        }
        let token = CancellationToken::new();
        let id = self.next_interval_id.fetch_add(1, Ordering::SeqCst);
        if let Some(config) = self.write().config.as_mut() {
            config.experiment.results_upload.interval_id = id;
        }

        let manager = Arc::clone(self);
        let stop = token.clone();
        let task = tokio::spawn(async move { manager.run_periodic(results, period, stop).await });
        *slot = Some(PeriodicUpload { token, task });
        drop(slot);

        info!(interval_id = id, period_secs = period.as_secs(), "periodic upload armed");
        id
    }

    async fn run_periodic(&self, results: SharedResults, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("periodic upload stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = results.lock().unwrap_or_else(PoisonError::into_inner).clone();
                    match self.upload_results(&snapshot, UploadOptions::incremental()).await {
                        Ok(outcome) => debug!(?outcome, "periodic upload"),
                        Err(e) => warn!(error = %e, "periodic upload failed, retrying next period"),
                    }
                }
            }
        }
    }

    /// Stop the periodic upload and wait for a request it already started.
    ///
    /// Returns `false` if none was armed.
    pub async fn cancel_periodic_upload(&self) -> bool {
        match self.disarm_periodic() {
            Some(task) => {
                join_periodic(task).await;
                true
            }
            None => false,
        }
    }

    /// Stop the timer without waiting; the returned task may still be uploading.
    pub(crate) fn disarm_periodic(&self) -> Option<JoinHandle<()>> {
        let periodic = self
            .periodic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        periodic.token.cancel();
        if let Some(config) = self.write().config.as_mut() {
            config.experiment.results_upload.interval_id = NO_INTERVAL;
        }
        debug!("periodic upload disarmed");
        Some(periodic.task)
    }

    /// Identifier of the armed periodic upload, [`NO_INTERVAL`] when none.
    pub fn interval_id(&self) -> i64 {
        self.read()
            .config
            .as_ref()
            .map_or(NO_INTERVAL, |c| c.experiment.results_upload.interval_id)
    }
}
