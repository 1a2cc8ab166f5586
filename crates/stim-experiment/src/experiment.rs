use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stim_core::{Clock, FlowError, MonotonicClock, Scheduler};
use stim_model::{
    ControlSignal, Event, EventKind, ExperimentStatus, ResourceStatus, ResultsTable, SchedulerState,
    SessionStatus,
};
use stim_observe::log_event;
use stim_session::{SessionManager, SharedResults, UploadOptions, UploadOutcome};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ExperimentError;
use crate::host::Host;
use crate::quit::{PauseHandle, QuitHandle};
use crate::settings::ExperimentSettings;
use crate::system::RunInfo;

const COMPLETED_MESSAGE: &str = "Thank you for your participation.";
const STOPPED_MESSAGE: &str = "The experiment was ended before completion.";

/// Drives one experiment run.
///
/// `start` resolves the configuration and opens the session, `run` ticks the flow until it
/// ends, `quit` saves results and tears the session down. The host signals an abrupt close
/// through [`Experiment::closing_token`].
pub struct Experiment {
    settings: ExperimentSettings,
    host: Box<dyn Host>,
    clock: Arc<dyn Clock>,
    session: Arc<SessionManager>,
    flow: Scheduler,
    status: ExperimentStatus,
    results: SharedResults,
    events: Vec<Event>,
    quit: QuitHandle,
    pause: PauseHandle,
    /// Cancelled by the host when it is about to close.
    closing: CancellationToken,
    /// Cancelled by a regular quit; the finalizer then has nothing to do.
    disarm: CancellationToken,
    finalizer: Option<JoinHandle<()>>,
    host_open: bool,
    ended: bool,
}

impl Experiment {
    pub fn new(settings: ExperimentSettings, host: impl Host) -> Result<Self, ExperimentError> {
        Self::with_clock(settings, host, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        settings: ExperimentSettings,
        host: impl Host,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ExperimentError> {
        let session = Arc::new(SessionManager::new(Arc::clone(&clock))?);
        let flow = Scheduler::new(settings.name.clone());
        Ok(Self {
            settings,
            host: Box::new(host),
            clock,
            session,
            flow,
            status: ExperimentStatus::NotConfigured,
            results: Arc::new(Mutex::new(ResultsTable::new())),
            events: Vec::new(),
            quit: QuitHandle::new(),
            pause: PauseHandle::new(),
            closing: CancellationToken::new(),
            disarm: CancellationToken::new(),
            finalizer: None,
            host_open: false,
            ended: false,
        })
    }

    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Top-level flow; tasks can be added before and after `start`.
    pub fn flow_mut(&mut self) -> &mut Scheduler {
        &mut self.flow
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn results(&self) -> SharedResults {
        Arc::clone(&self.results)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn quit_handle(&self) -> QuitHandle {
        self.quit.clone()
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    /// Token the host cancels when it is about to close or has closed.
    pub fn closing_token(&self) -> CancellationToken {
        self.closing.clone()
    }

    /// Returns `true` while closing the host would abandon an open session.
    pub fn should_confirm_close(&self) -> bool {
        self.session.status() == SessionStatus::Open
    }

    fn lock_results(&self) -> MutexGuard<'_, ResultsTable> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&mut self, kind: EventKind, task: Option<&str>, reason: Option<String>) {
        let mut event = Event::new(kind, self.clock.now_ms());
        if let Some(task) = task {
            event = event.with_task(task);
        }
        if let Some(reason) = reason {
            event = event.with_reason(reason);
        }
        log_event(&event);
        self.events.push(event);
    }

    fn set_status(&mut self, next: ExperimentStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            warn!(from = ?self.status, to = ?next, "ignored illegal experiment transition");
            return false;
        }
        info!(from = ?self.status, to = ?next, "experiment status changed");
        self.status = next;
        true
    }

    /// Configure the session and get the flow ready to run.
    ///
    /// On failure the status becomes `Error` and the host presents the reason; no flow task
    /// has run at that point.
    pub async fn start(&mut self) -> Result<(), ExperimentError> {
        if self.status != ExperimentStatus::NotConfigured {
            return Err(ExperimentError::InvalidStatus {
                operation: "start",
                status: self.status,
            });
        }
        self.set_status(ExperimentStatus::Configuring);

        if let Err(e) = self.try_start().await {
            error!(error = %e, "experiment failed to start");
            self.record(EventKind::ConfigurationFailed, None, Some(e.to_string()));
            self.set_status(ExperimentStatus::Error);
            self.host
                .present(&format!("Unable to start the experiment: {e}"))
                .await;
            self.disarm.cancel();
            self.close_host().await;
            self.session.release();
            return Err(e);
        }
        Ok(())
    }

    async fn try_start(&mut self) -> Result<(), ExperimentError> {
        self.settings.validate()?;
        self.host
            .open()
            .await
            .map_err(|e| ExperimentError::Host(e.to_string()))?;
        self.host_open = true;

        let config = self
            .session
            .configure(self.settings.source.clone(), &self.settings.name)
            .await?;
        self.record(EventKind::Configured, Some(&config.experiment.name), None);

        let run = RunInfo::resolve(&self.settings.source);
        info!(
            participant = %run.participant,
            host = %run.host,
            platform = run.platform,
            arch = run.arch,
            "run environment resolved"
        );
        {
            let mut results = self.lock_results();
            results.set_extra_info("participant", run.participant);
            results.set_extra_info("date", run.date);
            results.set_extra_info("expName", config.experiment.name.clone());
        }
        self.set_status(ExperimentStatus::Configured);

        if config.is_server() {
            let token = self.session.open_session().await?;
            self.lock_results().set_extra_info("session", token);
            self.record(EventKind::SessionOpened, None, None);
            self.finalizer = Some(self.spawn_finalizer());
            self.session.arm_periodic_upload(Arc::clone(&self.results));
        }

        self.session.prepare_resources(self.settings.resources.clone());
        self.record(EventKind::ResourcesRequested, None, None);

        if !self.settings.defer_start {
            self.flow.start();
        }
        self.set_status(ExperimentStatus::Started);
        let name = self.flow.name().to_string();
        self.record(EventKind::FlowStarted, Some(&name), None);
        Ok(())
    }

    fn spawn_finalizer(&self) -> JoinHandle<()> {
        let closing = self.closing.clone();
        let disarm = self.disarm.clone();
        let session = Arc::clone(&self.session);
        let results = Arc::clone(&self.results);

        tokio::spawn(async move {
            tokio::select! {
                _ = disarm.cancelled() => {}
                _ = closing.cancelled() => finalize(&session, &results).await,
            }
        })
    }

    /// Tick the flow until it ends.
    ///
    /// Returns the final status. Ticks are skipped while paused.
    pub async fn run(&mut self) -> Result<ExperimentStatus, ExperimentError> {
        if !self.status.is_running() {
            return Err(ExperimentError::InvalidStatus {
                operation: "run",
                status: self.status,
            });
        }
        if self.flow.state() == SchedulerState::NotStarted {
            self.flow.start();
        }

        let mut ticker = tokio::time::interval(self.settings.frame_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let closing = self.closing.clone();
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = closing.cancelled() => {
                    self.abrupt_close().await;
                    break;
                }
                _ = ticker.tick() => {}
            }

            self.sync_pause();
            if self.status == ExperimentStatus::Paused {
                continue;
            }

            ticks += 1;
            let signal = self.flow.tick();

            if let Some(request) = self.quit.take() {
                self.quit(request.completed, request.message).await;
                break;
            }
            if signal == ControlSignal::Stop {
                match self.flow.take_error() {
                    Some(err) => self.fail(err).await,
                    None => {
                        let name = self.flow.name().to_string();
                        self.record(EventKind::FlowFinished, Some(&name), None);
                        self.quit(true, None).await;
                    }
                }
                break;
            }
        }

        debug!(ticks, status = ?self.status, "tick loop ended");
        Ok(self.status)
    }

    fn sync_pause(&mut self) {
        match (self.status, self.pause.is_paused()) {
            (ExperimentStatus::Started, true) => {
                self.set_status(ExperimentStatus::Paused);
                self.record(EventKind::FlowPaused, None, None);
            }
            (ExperimentStatus::Paused, false) => {
                self.set_status(ExperimentStatus::Started);
                self.record(EventKind::FlowResumed, None, None);
            }
            _ => {}
        }
    }

    pub fn pause(&mut self) -> Result<(), ExperimentError> {
        if !self.status.is_running() {
            return Err(ExperimentError::InvalidStatus {
                operation: "pause",
                status: self.status,
            });
        }
        self.pause.pause();
        self.sync_pause();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), ExperimentError> {
        if !self.status.is_running() {
            return Err(ExperimentError::InvalidStatus {
                operation: "resume",
                status: self.status,
            });
        }
        self.pause.resume();
        self.sync_pause();
        Ok(())
    }

    async fn fail(&mut self, err: FlowError) {
        error!(
            task = err.origin(),
            context = err.context(),
            error = %err.cause(),
            "flow failed"
        );
        self.record(EventKind::FlowFailed, Some(err.origin()), Some(err.to_string()));
        self.set_status(ExperimentStatus::Error);
        self.quit(
            false,
            Some(format!("The experiment stopped because of an error: {err}")),
        )
        .await;
    }

    fn finish_results(&self, completed: bool) -> ResultsTable {
        let mut results = self.lock_results();
        if !results.is_entry_empty() {
            results.next_entry();
        }
        results.set_finished(completed);
        results.clone()
    }

    /// End the run: save results, close the session and release the host.
    ///
    /// Only the first call has any effect. A run that ended in `Error` keeps that status.
    pub async fn quit(&mut self, completed: bool, message: Option<String>) {
        if self.ended {
            debug!("quit already handled");
            return;
        }
        self.ended = true;
        self.record(EventKind::QuitRequested, None, message.clone());

        let snapshot = self.finish_results(completed);
        self.flow.stop();
        self.record_unavailable_resources();
        self.disarm.cancel();
        self.session.cancel_periodic_upload().await;

        if self.session.config().is_some() {
            self.save(&snapshot).await;
        }

        let had_session = self.session.status() == SessionStatus::Open;
        match self.session.close_session(completed, false).await {
            Ok(()) if had_session => self.record(EventKind::SessionClosed, None, None),
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "session close failed, ignoring");
                self.record(EventKind::SessionCloseFailed, None, Some(e.to_string()));
            }
        }

        let fallback = if completed {
            COMPLETED_MESSAGE
        } else {
            STOPPED_MESSAGE
        };
        let message = message.unwrap_or_else(|| fallback.to_string());
        self.host.present(&message).await;
        self.close_host().await;

        if self.status != ExperimentStatus::Error {
            self.set_status(if completed {
                ExperimentStatus::Finished
            } else {
                ExperimentStatus::Stopped
            });
        }

        let target = if completed {
            self.settings.completion_url.clone()
        } else {
            self.settings.cancellation_url.clone()
        };
        if let Some(url) = target {
            self.host.redirect(&url).await;
        }

        self.finalizer = None;
        self.session.release();
        info!(status = ?self.status, "experiment ended");
    }

    async fn close_host(&mut self) {
        if !std::mem::take(&mut self.host_open) {
            return;
        }
        if let Err(e) = self.host.close().await {
            warn!(error = %e, "host close failed");
        }
    }

    fn record_unavailable_resources(&mut self) {
        let failed = self
            .session
            .registry()
            .list_by_status(ResourceStatus::Error);
        for record in failed {
            self.record(EventKind::ResourceUnavailable, Some(&record.name), record.error);
        }
    }

    async fn save(&mut self, snapshot: &ResultsTable) {
        match self
            .session
            .upload_results(snapshot, UploadOptions::final_save())
            .await
        {
            Ok(UploadOutcome::Suppressed | UploadOutcome::Empty | UploadOutcome::Throttled) => {
                self.record(EventKind::UploadSkipped, None, None);
            }
            Ok(outcome) => {
                self.record(EventKind::ResultsSaved, None, Some(format!("{outcome:?}")));
            }
            Err(e) => {
                warn!(error = %e, "final results upload failed");
                self.record(EventKind::UploadFailed, None, Some(e.to_string()));
            }
        }

        let events = self.events.clone();
        match self.session.upload_log(snapshot, &events).await {
            Ok(UploadOutcome::Suppressed) => {}
            Ok(outcome) => debug!(?outcome, "event log saved"),
            Err(e) => warn!(error = %e, "event log upload failed"),
        }
    }

    async fn abrupt_close(&mut self) {
        warn!("host is closing, ending the run without waiting for the session service");
        self.ended = true;
        self.flow.stop();
        self.record(EventKind::AbruptClose, None, None);

        match self.finalizer.take() {
            Some(finalizer) => {
                if let Err(e) = finalizer.await {
                    warn!(error = %e, "termination finalizer failed");
                }
            }
            None => finalize(&self.session, &self.results).await,
        }
        self.close_host().await;
        self.session.release();

        if self.status != ExperimentStatus::Error {
            self.set_status(ExperimentStatus::Stopped);
        }
    }
}

/// Last-chance save and close.
///
/// Both requests are queued in order and sent in the background; nothing waits for the
/// service to acknowledge them.
async fn finalize(session: &SessionManager, results: &SharedResults) {
    if session.is_closing() {
        return;
    }

    let snapshot = {
        let mut results = results.lock().unwrap_or_else(PoisonError::into_inner);
        if !results.is_entry_empty() {
            results.next_entry();
        }
        results.set_finished(false);
        results.clone()
    };
    if let Err(e) = session
        .upload_results(&snapshot, UploadOptions::beacon())
        .await
    {
        warn!(error = %e, "beacon upload failed");
    }
    if let Err(e) = session.close_session(false, true).await {
        warn!(error = %e, "immediate session close failed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stim_core::BoxError;
    use stim_session::ConfigSource;

    use super::*;
    use crate::NullHost;

    fn local_settings(dir: &std::path::Path) -> ExperimentSettings {
        let source = ConfigSource::parse("file:///tmp/stroop/index.html?participant=p01")
            .unwrap()
            .with_results_dir(dir);
        ExperimentSettings::new("stroop", source).with_frame_period(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(local_settings(dir.path()), NullHost).unwrap();
        experiment.start().await.unwrap();

        assert!(matches!(
            experiment.start().await,
            Err(ExperimentError::InvalidStatus { operation: "start", .. })
        ));
    }

    #[tokio::test]
    async fn run_before_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(local_settings(dir.path()), NullHost).unwrap();
        assert!(matches!(
            experiment.run().await,
            Err(ExperimentError::InvalidStatus { operation: "run", .. })
        ));
    }

    #[tokio::test]
    async fn invalid_settings_fail_start() {
        let dir = tempfile::tempdir().unwrap();
        let settings = local_settings(dir.path()).with_frame_period(Duration::ZERO);
        let mut experiment = Experiment::new(settings, NullHost).unwrap();

        assert!(matches!(
            experiment.start().await,
            Err(ExperimentError::Settings(_))
        ));
        assert_eq!(experiment.status(), ExperimentStatus::Error);
    }

    #[tokio::test]
    async fn completed_flow_finishes_and_writes_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(local_settings(dir.path()), NullHost).unwrap();
        let results = experiment.results();
        experiment.flow_mut().add_step("trial", move || {
            results.lock().unwrap().add_data("word", "red");
            Ok(ControlSignal::Next)
        });

        experiment.start().await.unwrap();
        assert_eq!(experiment.run().await.unwrap(), ExperimentStatus::Finished);

        let table = experiment.results();
        let table = table.lock().unwrap();
        assert!(table.is_finished());
        assert!(table.is_completed());
        assert_eq!(table.len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn failing_step_sets_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(local_settings(dir.path()), NullHost).unwrap();
        experiment
            .flow_mut()
            .add_step("broken", || Err(BoxError::from("stimulus missing")));

        experiment.start().await.unwrap();
        assert_eq!(experiment.run().await.unwrap(), ExperimentStatus::Error);

        let failed = experiment
            .events()
            .iter()
            .find(|e| e.kind == EventKind::FlowFailed)
            .unwrap();
        assert_eq!(failed.task.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn quit_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(local_settings(dir.path()), NullHost).unwrap();
        experiment.start().await.unwrap();

        experiment.quit(false, None).await;
        experiment.quit(true, None).await;

        assert_eq!(experiment.status(), ExperimentStatus::Stopped);
        let quits = experiment
            .events()
            .iter()
            .filter(|e| e.kind == EventKind::QuitRequested)
            .count();
        assert_eq!(quits, 1);
    }

    #[tokio::test]
    async fn local_run_needs_no_close_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(local_settings(dir.path()), NullHost).unwrap();
        experiment.start().await.unwrap();
        assert!(!experiment.should_confirm_close());
    }
}
