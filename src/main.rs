//! Vimbridge - plugin host for Vim and Neovim

use clap::Parser;

use vimbridge::cli::App;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    App::parse().run().await
}
