use async_trait::async_trait;
use stim_core::BoxError;
use tracing::info;

/// Rendering and dialog collaborator of an experiment.
///
/// The orchestrator calls it only while starting and quitting, never between ticks.
#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// Prepare the display before the flow runs.
    async fn open(&self) -> Result<(), BoxError>;

    async fn close(&self) -> Result<(), BoxError>;

    /// Show a message to the participant and wait until it is dismissed.
    async fn present(&self, message: &str);

    /// Send the participant to `url` once the run is over.
    async fn redirect(&self, url: &str);
}

/// Host without a display; every call is logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

#[async_trait]
impl Host for NullHost {
    async fn open(&self) -> Result<(), BoxError> {
        info!("host opened");
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        info!("host closed");
        Ok(())
    }

    async fn present(&self, message: &str) {
        info!(%message, "message presented");
    }

    async fn redirect(&self, url: &str) {
        info!(%url, "redirect requested");
    }
}
