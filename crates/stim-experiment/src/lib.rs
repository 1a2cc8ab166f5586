//! Experiment orchestration: lifecycle status, tick loop and termination.

mod error;
pub use error::ExperimentError;

mod host;
pub use host::{Host, NullHost};

mod settings;
pub use settings::ExperimentSettings;

pub mod system;

mod quit;
pub use quit::{PauseHandle, QuitHandle, QuitRequest};

mod experiment;
pub use experiment::Experiment;
