use std::borrow::Borrow;

use stim_model::{Event, EventKind};
use tracing::{debug, error, info, warn};

pub trait View {
    fn as_task(&self) -> &str;
    fn as_reason(&self) -> &str;
    fn at_ms(&self) -> u64;
    fn kind(&self) -> EventKind;
    fn has_reason(&self) -> bool;
}

impl<T> View for T
where
    T: Borrow<Event>,
{
    #[inline]
    fn as_task(&self) -> &str {
        self.borrow().task.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn as_reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn at_ms(&self) -> u64 {
        self.borrow().at_ms
    }
    #[inline]
    fn kind(&self) -> EventKind {
        self.borrow().kind
    }
    #[inline]
    fn has_reason(&self) -> bool {
        self.borrow().reason.is_some()
    }
}

#[inline]
pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        // configuration
        EventKind::Configured => "experiment configured",
        EventKind::ConfigurationFailed => "experiment configuration failed",

        // session
        EventKind::SessionOpened => "remote session opened",
        EventKind::SessionClosed => "remote session closed",
        EventKind::SessionCloseFailed => "remote session could not be closed",

        // resources
        EventKind::ResourcesRequested => "resource downloads started",
        EventKind::ResourceUnavailable => "resource unavailable (download failed)",

        // uploads
        EventKind::ResultsSaved => "results saved",
        EventKind::UploadSkipped => "results upload skipped",
        EventKind::UploadFailed => "results upload failed",

        // flow
        EventKind::FlowStarted => "flow started",
        EventKind::FlowPaused => "flow paused",
        EventKind::FlowResumed => "flow resumed",
        EventKind::FlowFinished => "flow finished",
        EventKind::FlowFailed => "flow stopped on error",

        // termination
        EventKind::QuitRequested => "quit requested",
        EventKind::AbruptClose => "host is closing; finalizing without waiting",
    }
}

#[inline]
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());

    match e.kind() {
        // configuration
        EventKind::Configured => info!(task = e.as_task(), "{msg}"),
        EventKind::ConfigurationFailed => error!(reason = e.as_reason(), "{msg}"),

        // session
        EventKind::SessionOpened | EventKind::SessionClosed => {
            info!(task = e.as_task(), "{msg}")
        }
        EventKind::SessionCloseFailed => warn!(reason = e.as_reason(), "{msg}"),

        // resources
        EventKind::ResourcesRequested => debug!(task = e.as_task(), "{msg}"),
        EventKind::ResourceUnavailable => {
            warn!(task = e.as_task(), reason = e.as_reason(), "{msg}")
        }

        // uploads
        EventKind::ResultsSaved => info!(task = e.as_task(), "{msg}"),
        EventKind::UploadSkipped => debug!(task = e.as_task(), "{msg}"),
        EventKind::UploadFailed => {
            warn!(task = e.as_task(), reason = e.as_reason(), "{msg}")
        }

        // flow
        EventKind::FlowStarted | EventKind::FlowPaused | EventKind::FlowResumed => {
            debug!(at_ms = e.at_ms(), "{msg}")
        }
        EventKind::FlowFinished => info!(at_ms = e.at_ms(), "{msg}"),
        EventKind::FlowFailed => error!(
            task = e.as_task(),
            reason = e.as_reason(),
            at_ms = e.at_ms(),
            "{msg}"
        ),

        // termination
        EventKind::QuitRequested => {
            if e.has_reason() {
                info!(reason = e.as_reason(), "{msg}")
            } else {
                info!("{msg}")
            }
        }
        EventKind::AbruptClose => warn!("{msg}"),
    }
}
