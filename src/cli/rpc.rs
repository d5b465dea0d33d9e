//! Rpc command handler.

use std::path::PathBuf;

use color_eyre::eyre::eyre;
use color_eyre::Result;

use crate::engine::Engine;
use crate::wire::Backend;

use super::{App, DemoPlugin};

impl App {
    /// Serve the demo plugin over a Neovim listen socket.
    pub async fn run_rpc(&self, socket: Option<PathBuf>) -> Result<()> {
        let socket = socket
            .or_else(|| std::env::var_os("NVIM").map(PathBuf::from))
            .ok_or_else(|| eyre!("no socket given: pass --socket, set host.socket or run inside Neovim"))?;

        tracing::info!(socket = %socket.display(), "Starting Vimbridge on msgpack-RPC");
        let backend = Backend::connect_socket(&socket).await?;

        Engine::new(backend, DemoPlugin::default())
            .run()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Host failed");
                eyre!("Host failed: {}", e)
            })?;

        tracing::info!("Editor disconnected, shutting down");
        Ok(())
    }
}
