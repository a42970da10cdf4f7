use anyhow::Result;
use clap::Parser;
use commands::handle_commands;
use maspipe::config::load_config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::MasPipe::parse();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::from(
            args.verbosity,
        ))
        .with(console_layer)
        .init();

    let config = load_config(args.config.as_ref())?;
    tracing::debug!("{config:?}");

    handle_commands(&config, args.commands).await
}
