//! Configuration with layered resolution using figment.
//!
//! Resolution order (highest priority last):
//! 1. User config: `~/.config/vimbridge/config.toml` (XDG) or platform config dir
//! 2. Project config: `.vimbridge.toml`
//! 3. Environment variables: `VIMBRIDGE_*` (nested keys separated by `__`)
//!
//! # Example
//!
//! ```toml
//! [host]
//! backend = "rpc"
//! socket = "/tmp/nvim.sock"
//! log_file = "/tmp/vimbridge.log"
//! log_filter = "vimbridge=debug"
//! ```
//!
//! Every field has a default, so a missing configuration is valid and selects
//! the channel backend over stdin/stdout.

use std::ops::Deref;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::wire::BackendKind;

/// Boxed wrapper for figment::Error to reduce Result size on the stack.
#[derive(Debug)]
pub struct ConfigError(Box<figment::Error>);

impl Deref for ConfigError {
    type Target = figment::Error;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self(Box::new(err))
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
}

/// Connection and logging settings for the host.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Wire backend to speak.
    #[serde(default)]
    pub backend: BackendKind,
    /// Neovim listen socket, required by the rpc backend.
    #[serde(default)]
    pub socket: Option<PathBuf>,
    /// Log destination. Stderr when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// `tracing_subscriber` filter directive.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            socket: None,
            log_file: None,
            log_filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Load config with layered resolution (user → project → env).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::user_config_path(), Path::new(".vimbridge.toml"))
    }

    /// Load config from explicit user and project files, then the environment.
    ///
    /// Missing files are skipped.
    pub fn load_from(user_config: &Path, project_config: &Path) -> Result<Self, ConfigError> {
        Figment::new()
            // Layer 1: User config (lowest priority)
            .merge(Toml::file(user_config))
            // Layer 2: Project config
            .merge(Toml::file(project_config))
            // Layer 3: Environment variables (highest priority)
            .merge(Env::prefixed("VIMBRIDGE_").split("__"))
            .extract()
            .map_err(ConfigError::from)
    }

    /// User config path: ~/.config/vimbridge/config.toml (XDG) or platform config dir.
    fn user_config_path() -> PathBuf {
        // Prefer XDG config location (~/.config) on all platforms
        if let Some(home) = dirs::home_dir() {
            let xdg_path = home.join(".config").join("vimbridge").join("config.toml");
            if xdg_path.exists() {
                return xdg_path;
            }
        }
        dirs::config_dir()
            .map(|p| p.join("vimbridge").join("config.toml"))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            Config::load_from(&dir.path().join("none.toml"), &dir.path().join("none2.toml"))
                .unwrap();
        assert_eq!(config.host.backend, BackendKind::Channel);
        assert_eq!(config.host.log_filter, "info");
        assert!(config.host.socket.is_none());
    }

    #[test]
    fn test_project_overrides_user() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        let project = dir.path().join("project.toml");

        let mut f = std::fs::File::create(&user).unwrap();
        writeln!(f, "[host]\nbackend = \"channel\"\nlog_filter = \"debug\"").unwrap();
        let mut f = std::fs::File::create(&project).unwrap();
        writeln!(f, "[host]\nbackend = \"rpc\"\nsocket = \"/tmp/nvim.sock\"").unwrap();

        let config = Config::load_from(&user, &project).unwrap();
        assert_eq!(config.host.backend, BackendKind::Rpc);
        assert_eq!(config.host.socket, Some(PathBuf::from("/tmp/nvim.sock")));
        assert_eq!(config.host.log_filter, "debug");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project.toml");
        let mut f = std::fs::File::create(&project).unwrap();
        writeln!(f, "[host]\nbackend = \"carrier-pigeon\"").unwrap();

        assert!(Config::load_from(&dir.path().join("none.toml"), &project).is_err());
    }
}
