pub mod clock;
pub use clock::{Clock, ManualClock, MonotonicClock};

pub mod error;
pub use error::{BoxError, FlowError};

pub mod scheduler;
pub use scheduler::{Branch, Scheduler, Step, StepResult, Task};

pub mod resources;
pub use resources::{Readiness, ResourceRegistry};

pub mod gate;
pub use gate::wait_for_resources;
