pub mod replies;
mod router;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::channels::traits::{Channel, ChannelMessage, MediaAttachment};
use crate::config::Config;
use crate::downloader::{DownloadOutcome, Fetcher};
use crate::fileserver::FileServer;
use crate::gate::DownloadGate;
use crate::links::extract_link;
use crate::storage;

/// Wires channels, the single-slot gate, the downloader and the file
/// server into one message-driven loop.
pub struct RelayRuntime {
    channels: Vec<Arc<dyn Channel>>,
    fetcher: Arc<dyn Fetcher>,
    gate: DownloadGate,
    max_attachment_bytes: u64,
    server: FileServer,
}

impl RelayRuntime {
    pub fn new(channels: Vec<Arc<dyn Channel>>, fetcher: Arc<dyn Fetcher>, config: &Config) -> Self {
        Self {
            channels,
            fetcher,
            gate: DownloadGate::new(),
            max_attachment_bytes: config.download.max_attachment_bytes,
            server: FileServer::from_config(&config.serve),
        }
    }

    /// Drains channel messages until every listener sender is dropped.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ChannelMessage>) {
        while let Some(msg) = rx.recv().await {
            self.handle_channel_message(msg);
        }
        tracing::info!("relay loop finished: all channel listeners are gone");
    }

    /// One message in, at most one download task out. Messages without a
    /// link are ignored, and anything arriving while a download holds the
    /// single slot is dropped without a reply.
    pub fn handle_channel_message(self: &Arc<Self>, msg: ChannelMessage) {
        let Some(link) = extract_link(&msg.content) else {
            tracing::trace!(channel = %msg.channel, sender = %msg.sender, "no link in message, ignoring");
            return;
        };

        let Some(permit) = self.gate.try_acquire() else {
            tracing::info!(channel = %msg.channel, sender = %msg.sender, "download slot busy, dropping request");
            return;
        };

        let url = link.to_string();
        let rt = Arc::clone(self);
        tokio::spawn(async move {
            // Holding the permit inside the task keeps the slot taken for
            // the whole download and releases it even if the task panics.
            let _permit = permit;
            rt.process_download(&msg, &url).await;
        });
    }

    async fn process_download(&self, msg: &ChannelMessage, url: &str) {
        let started = Instant::now();
        tracing::info!(channel = %msg.channel, sender = %msg.sender, %url, "download requested");

        if let Err(error) = self.send_typing_to_origin(msg).await {
            tracing::debug!(%error, "typing indicator failed");
        }

        match self.fetcher.fetch(url, &msg.sender).await {
            DownloadOutcome::Completed { path, size_bytes } => {
                tracing::info!(
                    file = %path.display(),
                    size = %storage::human_size(size_bytes),
                    elapsed_secs = started.elapsed().as_secs(),
                    "download finished"
                );
                router::deliver_file(self, msg, path, size_bytes).await;
            }
            DownloadOutcome::TimedOut => {
                tracing::warn!(%url, "download timed out and was cancelled");
                if let Err(error) = self.reply_to_origin(msg, replies::REPLY_TIMEOUT).await {
                    tracing::warn!(%error, "failed to send timeout reply");
                }
            }
            DownloadOutcome::Failed { reason } => {
                tracing::warn!(%url, %reason, "download failed");
                if let Err(error) = self.reply_to_origin(msg, replies::REPLY_DOWNLOAD_FAILED).await
                {
                    tracing::warn!(%error, "failed to send download failure reply");
                }
            }
        }
    }

    async fn reply_to_origin(&self, msg: &ChannelMessage, text: &str) -> anyhow::Result<()> {
        for ch in &self.channels {
            if ch.name() == msg.channel {
                ch.send(text, reply_target(msg)).await?;
                break;
            }
        }
        Ok(())
    }

    async fn send_media_to_origin(
        &self,
        msg: &ChannelMessage,
        attachment: &MediaAttachment,
    ) -> anyhow::Result<()> {
        for ch in &self.channels {
            if ch.name() == msg.channel {
                ch.send_media(attachment, reply_target(msg)).await?;
                break;
            }
        }
        Ok(())
    }

    async fn send_typing_to_origin(&self, msg: &ChannelMessage) -> anyhow::Result<()> {
        for ch in &self.channels {
            if ch.name() == msg.channel {
                ch.send_typing(reply_target(msg)).await?;
                break;
            }
        }
        Ok(())
    }
}

/// Replies go to the conversation the message arrived in, falling back to
/// the sender id for channels that address users directly.
fn reply_target(msg: &ChannelMessage) -> &str {
    msg.conversation_id.as_deref().unwrap_or(&msg.sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;

    struct NeverFetcher;

    impl Fetcher for NeverFetcher {
        fn name(&self) -> &str {
            "never"
        }

        fn fetch<'a>(
            &'a self,
            _url: &'a str,
            _sender: &'a str,
        ) -> Pin<Box<dyn Future<Output = DownloadOutcome> + Send + 'a>> {
            Box::pin(async move { panic!("fetch should not run for messages without a link") })
        }
    }

    fn message_with(content: &str) -> ChannelMessage {
        ChannelMessage {
            id: "id".to_string(),
            sender: "sender-1".to_string(),
            content: content.to_string(),
            channel: "discord".to_string(),
            conversation_id: Some("conv-1".to_string()),
            message_id: None,
            timestamp: 0,
        }
    }

    #[test]
    fn reply_target_prefers_conversation_id() {
        let msg = message_with("hola");
        assert_eq!(reply_target(&msg), "conv-1");

        let mut dm = message_with("hola");
        dm.conversation_id = None;
        assert_eq!(reply_target(&dm), "sender-1");
    }

    #[tokio::test]
    async fn linkless_message_touches_neither_fetcher_nor_gate() {
        let rt = Arc::new(RelayRuntime::new(
            vec![],
            Arc::new(NeverFetcher),
            &Config::default(),
        ));

        rt.handle_channel_message(message_with("sin enlaces por aquí"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(
            rt.gate.try_acquire().is_some(),
            "gate must stay free when no download starts"
        );
    }
}
