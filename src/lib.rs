//! Vimbridge - plugin host for Vim and Neovim
//!
//! Serves editor-side function, command and autocommand calls from Rust
//! handlers, and lets those handlers call back into the editor, over Vim's
//! JSON channel or Neovim's msgpack-RPC.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod supervisor;
pub mod wire;

pub use engine::{Completion, Engine, Plugin, Vim};
pub use error::{HostError, Result};
