//! Channel command handler.

use color_eyre::Result;

use crate::engine::Engine;
use crate::wire::Backend;

use super::{App, DemoPlugin};

impl App {
    /// Serve the demo plugin over stdin/stdout.
    pub async fn run_channel(&self) -> Result<()> {
        tracing::info!("Starting Vimbridge on the JSON channel");

        Engine::new(Backend::stdio(), DemoPlugin::default())
            .run()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Host failed");
                color_eyre::eyre::eyre!("Host failed: {}", e)
            })?;

        tracing::info!("Editor disconnected, shutting down");
        Ok(())
    }
}
