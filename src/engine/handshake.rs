//! Load handshake: `loaded`, identity probe, plugin init, `initcomplete`.

use std::sync::Arc;

use super::handle::{check, Vim};
use super::{EditorIdentity, Phase, Plugin, Shared};
use crate::error::{HostError, Result};
use crate::models::editor::{self, VimDetails, NEOVIM_PROBE_EXPR, VIM_PROBE_EXPR};
use crate::models::Flavor;
use crate::wire::BackendKind;

pub(crate) async fn run(shared: Arc<Shared>, plugin: Arc<dyn Plugin>) -> Result<()> {
    let vim = Vim::user(shared.clone());

    let resp = vim.raw_call("loaded", Vec::new()).await?;
    check(resp, || "signal loaded".to_string())?;
    shared.set_phase(Phase::Loaded);
    tracing::info!(
        instance = %shared.instance,
        host_version = env!("CARGO_PKG_VERSION"),
        "host loaded"
    );

    let identity = probe(&vim, shared.backend).await?;
    tracing::info!(
        instance = %shared.instance,
        flavor = %identity.flavor,
        version = %identity.version,
        "Loaded against editor"
    );
    let _ = shared.identity.set(identity);

    plugin
        .init(vim.clone())
        .await
        .map_err(|e| HostError::Handler(format!("plugin init failed: {e:#}")))?;

    let resp = vim.raw_call("initcomplete", Vec::new()).await?;
    check(resp, || "signal initcomplete".to_string())?;
    shared.set_phase(Phase::Initialized);
    tracing::debug!(instance = %shared.instance, "plugin initialized");
    Ok(())
}

async fn probe(vim: &Vim, backend: BackendKind) -> Result<EditorIdentity> {
    match backend {
        BackendKind::Channel => {
            let value = vim.expr(VIM_PROBE_EXPR).await?;
            let details: VimDetails = serde_json::from_value(value).map_err(|e| {
                HostError::protocol(format!("failed to decode editor details: {e}"))
            })?;
            Ok(EditorIdentity {
                flavor: details.flavor(),
                version: details.version(),
            })
        }
        BackendKind::Rpc => {
            let value = vim.expr(NEOVIM_PROBE_EXPR).await?;
            let output = value.as_str().unwrap_or_default();
            Ok(EditorIdentity {
                flavor: Flavor::Neovim,
                version: editor::parse_neovim_version(output),
            })
        }
    }
}
