#![warn(clippy::all, clippy::pedantic)]

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use vidrelay::app;
use vidrelay::cli::Cli;
use vidrelay::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Rustls refuses to guess a process-level CryptoProvider when more than
    // one is compiled in, so pin ring before anything opens a TLS session.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("warning: could not install rustls crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("install tracing subscriber");

    let mut config = Config::load_or_init()?;
    config.override_from_env();
    app::dispatch(cli, config).await
}
