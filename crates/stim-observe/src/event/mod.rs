mod view;
pub use view::{View, log_event, message_for};
