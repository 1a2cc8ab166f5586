use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use stim_core::Step;
use stim_model::ControlSignal;
use tracing::debug;

/// Quit asked for from inside the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuitRequest {
    pub completed: bool,
    pub message: Option<String>,
}

/// Lets flow steps end the run.
///
/// The request is picked up by the tick loop right after the current tick; the first
/// request wins.
#[derive(Debug, Clone, Default)]
pub struct QuitHandle {
    request: Arc<Mutex<Option<QuitRequest>>>,
}

impl QuitHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, completed: bool, message: Option<String>) {
        let mut slot = self.request.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            debug!(completed, "quit requested by the flow");
            *slot = Some(QuitRequest { completed, message });
        }
    }

    pub fn is_requested(&self) -> bool {
        self.request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn take(&self) -> Option<QuitRequest> {
        self.request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Step that requests a quit and stops the flow.
    pub fn step(&self, name: impl Into<String>, completed: bool, message: Option<String>) -> Step {
        let handle = self.clone();
        let mut message = message;
        Step::new(name, move || {
            handle.request(completed, message.take());
            Ok(ControlSignal::Stop)
        })
    }
}

/// Suspends flow ticks without ending the run.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle {
    paused: Arc<AtomicBool>,
}

impl PauseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_wins() {
        let quit = QuitHandle::new();
        quit.request(false, Some("escape pressed".into()));
        quit.request(true, None);

        assert_eq!(
            quit.take(),
            Some(QuitRequest {
                completed: false,
                message: Some("escape pressed".into())
            })
        );
        assert!(!quit.is_requested());
    }

    #[test]
    fn quit_step_stops_the_flow() {
        let quit = QuitHandle::new();
        let mut flow = stim_core::Scheduler::new("root");
        flow.add(quit.step("quit", true, None));
        flow.add_step("after", || panic!("must not run"));
        flow.start();

        assert_eq!(flow.tick(), ControlSignal::Stop);
        assert!(quit.is_requested());
    }
}
