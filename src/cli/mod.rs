//! CLI module for Vimbridge.
//!
//! Subcommands:
//! - `channel`: Serve the demo plugin over Vim's JSON channel (stdio)
//! - `rpc`: Serve the demo plugin over a Neovim msgpack-RPC socket
//! - `serve`: Serve over whichever backend the configuration selects

mod channel;
mod demo;
mod rpc;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, HostConfig};
use crate::wire::BackendKind;

pub use demo::DemoPlugin;

/// Vimbridge - plugin host for Vim and Neovim
#[derive(Parser)]
#[command(name = "vimbridge")]
#[command(about = "Plugin host bridging Vim/Neovim and Rust handlers")]
#[command(version)]
pub struct App {
    /// Run in verbose mode
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve over Vim's JSON channel on stdin/stdout
    Channel,

    /// Serve over a Neovim msgpack-RPC socket
    Rpc {
        /// Neovim listen socket (defaults to `host.socket` from the config)
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// Serve over the backend selected by the configuration
    Serve,
}

impl App {
    /// Run the CLI application.
    pub async fn run(self) -> Result<()> {
        let mut config = Config::load()?;
        if let Some(path) = &self.log_file {
            config.host.log_file = Some(path.clone());
        }
        self.init_logging(&config.host)?;

        match self.command {
            Command::Channel => self.run_channel().await,
            Command::Rpc { ref socket } => {
                let socket = socket.clone().or(config.host.socket.clone());
                self.run_rpc(socket).await
            }
            Command::Serve => match config.host.backend {
                BackendKind::Channel => self.run_channel().await,
                BackendKind::Rpc => self.run_rpc(config.host.socket.clone()).await,
            },
        }
    }

    /// Initialize tracing. Stdout carries the channel protocol, so logs go
    /// to the configured file or stderr.
    fn init_logging(&self, host: &HostConfig) -> Result<()> {
        let filter = if self.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&host.log_filter))
        };

        match &host.log_file {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
            None => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
        Ok(())
    }
}
