//! Remote session lifecycle: configuration, session open/close, resource downloads and
//! results upload.

pub use reqwest::Url;

mod config;
pub use config::ConfigSource;

mod errors;
pub use errors::SessionError;

mod remote;

mod manager;
pub use manager::SessionManager;

mod resources;

mod upload;
pub use upload::{SharedResults, Transport, UploadOptions, UploadOutcome, results_key};
