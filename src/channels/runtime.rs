use crate::channels::traits::{Channel, ChannelMessage};
use std::sync::Arc;
use std::time::Duration;

pub const CHANNEL_INITIAL_BACKOFF_SECS: u64 = 2;
pub const CHANNEL_MAX_BACKOFF_SECS: u64 = 60;

/// Keep a channel listener alive. A listener that returns or errors is
/// restarted after a pause that doubles up to the ceiling and snaps back to
/// the floor on a clean run. The task ends when the ingest side hangs up.
pub fn supervise_channel(
    ch: Arc<dyn Channel>,
    tx: tokio::sync::mpsc::Sender<ChannelMessage>,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
) -> tokio::task::JoinHandle<()> {
    let floor = initial_backoff_secs.max(1);
    let ceiling = max_backoff_secs.max(floor);

    tokio::spawn(async move {
        let mut backoff = floor;

        loop {
            tracing::debug!(channel = ch.name(), "listener starting");

            match ch.listen(tx.clone()).await {
                _ if tx.is_closed() => break,
                Ok(()) => {
                    tracing::warn!("channel {} listener returned, restarting", ch.name());
                    backoff = floor;
                }
                Err(error) => {
                    tracing::error!("channel {} listener failed: {error:#}, restarting", ch.name());
                }
            }

            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = backoff.saturating_mul(2).min(ceiling);
        }
    })
}
