//! Editor identity.

use serde::Deserialize;

/// Which editor the host is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavor {
    #[default]
    Vim,
    Gvim,
    Neovim,
}

impl Flavor {
    pub fn all() -> &'static [Flavor] {
        &[Flavor::Vim, Flavor::Gvim, Flavor::Neovim]
    }
}

impl std::fmt::Display for Flavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flavor::Vim => f.write_str("vim"),
            Flavor::Gvim => f.write_str("gvim"),
            Flavor::Neovim => f.write_str("neovim"),
        }
    }
}

/// Expression evaluated against Vim to identify it.
pub const VIM_PROBE_EXPR: &str =
    r#"{"VersionLong": exists("v:versionlong")?v:versionlong:-1, "GuiRunning": has("gui_running")}"#;

/// Expression evaluated against Neovim to identify it.
pub const NEOVIM_PROBE_EXPR: &str = "execute('version')";

/// The answer to [`VIM_PROBE_EXPR`].
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VimDetails {
    #[serde(default)]
    pub version_long: i64,
    #[serde(default)]
    pub gui_running: i64,
}

impl VimDetails {
    pub fn flavor(&self) -> Flavor {
        if self.gui_running == 1 {
            Flavor::Gvim
        } else {
            Flavor::Vim
        }
    }

    pub fn version(&self) -> String {
        parse_version_long(self.version_long)
    }
}

/// Formats Vim's `v:versionlong` as `v<major>.<minor>.<patch>`.
pub fn parse_version_long(l: i64) -> String {
    let major = l / 1_000_000;
    let minor = (l / 10_000) % 10;
    let patch = l % 10_000;
    format!("v{major}.{minor}.{patch}")
}

/// Picks the version line out of Neovim's `:version` output.
pub fn parse_neovim_version(output: &str) -> String {
    output
        .trim_start_matches('\n')
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}
