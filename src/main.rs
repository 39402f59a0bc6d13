use anyhow::Context;
use clap::Parser;
use tracing::info;

use patternmq::app::{self, config::Cli, logging};
use patternmq::core::Shutdown;
use patternmq::transport::network::tcp::TcpTransportFactory;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json).context("initialising logging")?;

    let shutdown = Shutdown::new();
    let handler = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("shutdown requested");
        handler.signal();
    })
    .context("installing the signal handler")?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting patternmq");
    app::run(&TcpTransportFactory::default(), &cli.command, &shutdown)?;
    Ok(())
}
