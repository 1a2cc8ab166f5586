use thiserror::Error;
use tracing_subscriber::{filter::ParseError, util::TryInitError};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unknown log format `{0}` (expected text, json or journald)")]
    UnknownFormat(String),
    #[error("journald output requires linux and the `journald` feature")]
    JournaldUnavailable,
    #[error("invalid log filter `{directive}`")]
    InvalidFilter {
        directive: String,
        #[source]
        source: ParseError,
    },
    #[error("journald socket unavailable: {0}")]
    Journald(#[from] std::io::Error),
    #[error("a global subscriber is already installed")]
    AlreadyInitialized(#[from] TryInitError),
}
