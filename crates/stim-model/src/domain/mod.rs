mod signal;
pub use signal::ControlSignal;

mod scheduler_state;
pub use scheduler_state::SchedulerState;

mod resource;
pub use resource::{ResourceRecord, ResourceSpec, ResourceStatus};

mod session_config;
pub use session_config::{Environment, ExperimentInfo, ResultsUpload, SaveFormat, SessionConfig};

mod status;
pub use status::{ExperimentStatus, SessionStatus};

mod message_board;
pub use message_board::{MessageBoard, NO_OUTPUT_KEY, PILOT_TOKEN_KEY};

mod results;
pub use results::ResultsTable;

mod event;
pub use event::{Event, EventKind};

/// Identifier of a downloadable resource.
pub type ResourceName = String;

/// Sentinel stored in `resultsUpload.intervalId` while no periodic upload timer is armed.
pub const NO_INTERVAL: i64 = -1;
