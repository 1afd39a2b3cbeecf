use clap::{Parser, Subcommand};

/// `vidrelay` - Discord bot that downloads linked videos and relays them back.
#[derive(Parser, Debug)]
#[command(name = "vidrelay")]
#[command(version = "0.1.0")]
#[command(about = "Download videos linked in Discord messages and send them back.", long_about = None)]
pub struct Cli {
    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to Discord and serve download requests until interrupted
    Run,

    /// Check the local setup: config, downloader binary, scratch dir, ports
    Doctor,
}
