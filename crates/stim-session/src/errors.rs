use stim_model::{ConfigError, SessionStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("malformed configuration: {0}")]
    MalformedConfig(String),

    #[error("http request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("session service rejected {operation}: {status} {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("cannot {operation} while the session is {status:?}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },

    #[error("cannot {operation} in a local run")]
    LocalRun { operation: &'static str },

    #[error("resource `{name}` unavailable: {reason}")]
    Resource { name: String, reason: String },

    #[error("results upload failed: {0}")]
    Upload(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Returns `true` for errors caused by a missing or malformed configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SessionError::Configuration(_) | SessionError::MalformedConfig(_)
        )
    }
}
