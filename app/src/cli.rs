//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use livefeed_ipc::ConnectMode;

/// Connect to a live room and print its events as JSON lines.
#[derive(Debug, Parser)]
#[command(name = "livefeed", version, about)]
pub struct Args {
    /// Handle of the broadcaster, with or without the leading `@`.
    pub handle: String,

    /// Which backend to use: official, raw or auto. Defaults to the configured mode.
    #[arg(long)]
    pub mode: Option<ConnectMode>,

    /// JSON settings file.
    #[arg(long, env = "LIVEFEED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not fall back to the raw backend in auto mode.
    #[arg(long)]
    pub no_fallback: bool,
}
