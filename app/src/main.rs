//! livefeed command-line entry point.

use clap::Parser;

use livefeed_lib::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    livefeed_lib::init_logging();
    livefeed_lib::run(Args::parse()).await
}
