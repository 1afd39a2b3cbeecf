use anyhow::Result;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::channels::discord::DiscordChannel;
use crate::channels::traits::Channel;
use crate::config::{AUTO_PORT_RANGE, Config};
use crate::downloader::YtDlp;
use crate::storage::Scratch;

/// Prints a local setup report. Never fails the process; broken pieces are
/// reported as ❌ lines with a hint.
pub async fn run(config: &Config) -> Result<()> {
    println!("🩺 vidrelay doctor");
    println!("  Config file: {}", config.config_path.display());

    if config.discord.bot_token.is_empty() {
        println!("  ❌ discord.bot_token is empty");
        println!("  💡 Set it in the config file or via DISCORD_TOKEN");
    } else {
        println!("  ✅ Discord token configured");
        let channel = DiscordChannel::new(config.discord.clone());
        match tokio::time::timeout(Duration::from_secs(10), channel.health_check()).await {
            Ok(true) => println!("  ✅ Discord API reachable"),
            Ok(false) => {
                println!("  ❌ Discord rejected the token or is unreachable");
                println!("  💡 Double-check the token and your network connection");
            }
            Err(_) => println!("  ❌ Discord health check timed out"),
        }
    }

    match YtDlp::probe_version(&config.download.program).await {
        Ok(version) => println!("  ✅ {} version {version}", config.download.program),
        Err(error) => {
            println!("  ❌ {} not usable: {error:#}", config.download.program);
            println!("  💡 Install yt-dlp and make sure it is on PATH");
        }
    }

    let scratch = Scratch::new(config.download.scratch_dir());
    match scratch.ensure().await {
        Ok(()) => {
            let probe = scratch.dir().join(".doctor-probe");
            match tokio::fs::write(&probe, b"ok").await {
                Ok(()) => {
                    let _ = tokio::fs::remove_file(&probe).await;
                    println!("  ✅ scratch dir writable: {}", scratch.dir().display());
                }
                Err(error) => println!(
                    "  ❌ scratch dir not writable ({}): {error}",
                    scratch.dir().display()
                ),
            }
        }
        Err(error) => println!(
            "  ❌ could not create scratch dir ({}): {error}",
            scratch.dir().display()
        ),
    }

    match config.serve.port.fixed() {
        Some(port) => match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(_listener) => println!("  ✅ serve port {port} available"),
            Err(error) => println!("  ❌ serve port {port} unavailable: {error}"),
        },
        None => {
            let (start, end) = AUTO_PORT_RANGE;
            println!("  ✅ serve port: auto (probed in {start}-{end} at publish time)");
        }
    }

    Ok(())
}
