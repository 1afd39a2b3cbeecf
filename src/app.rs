use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::channels::discord::DiscordChannel;
use crate::channels::runtime::{
    CHANNEL_INITIAL_BACKOFF_SECS, CHANNEL_MAX_BACKOFF_SECS, supervise_channel,
};
use crate::channels::traits::{Channel, ChannelMessage};
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::doctor;
use crate::downloader::{Fetcher, YtDlp};
use crate::relay::RelayRuntime;
use crate::storage::{Scratch, human_size};

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Run => run_relay(config).await,
        Commands::Doctor => doctor::run(&config).await,
    }
}

async fn run_relay(config: Config) -> Result<()> {
    config.validate()?;

    let version = YtDlp::probe_version(&config.download.program)
        .await
        .context("downloader preflight failed")?;

    let scratch = Scratch::new(config.download.scratch_dir());
    scratch.ensure().await.context("create scratch directory")?;

    let fetcher: Arc<dyn Fetcher> = Arc::new(YtDlp::new(&config.download));
    let channels: Vec<Arc<dyn Channel>> =
        vec![Arc::new(DiscordChannel::new(config.discord.clone()))];

    println!("◆ vidrelay");
    println!("  › downloader: {} {version}", config.download.program);
    println!(
        "  › attachment limit: {}",
        human_size(config.download.max_attachment_bytes)
    );
    println!(
        "  › channels: {}",
        channels
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    println!("  Listening for links. Ctrl-C to stop.");
    println!();

    let (tx, rx) = mpsc::channel::<ChannelMessage>(100);

    let handles: Vec<_> = channels
        .iter()
        .map(|ch| {
            supervise_channel(
                Arc::clone(ch),
                tx.clone(),
                CHANNEL_INITIAL_BACKOFF_SECS,
                CHANNEL_MAX_BACKOFF_SECS,
            )
        })
        .collect();
    drop(tx);

    let relay = Arc::new(RelayRuntime::new(channels, fetcher, &config));

    tokio::select! {
        () = Arc::clone(&relay).run(rx) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("install Ctrl-C handler")?;
            tracing::info!("shutdown requested");
        }
    }

    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
