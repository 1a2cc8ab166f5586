use stim_core::FlowError;
use stim_model::{ConfigError, ExperimentStatus};
use stim_session::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("invalid experiment settings: {0}")]
    Settings(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("host failure: {0}")]
    Host(String),

    #[error("cannot {operation} while the experiment is {status:?}")]
    InvalidStatus {
        operation: &'static str,
        status: ExperimentStatus,
    },
}
