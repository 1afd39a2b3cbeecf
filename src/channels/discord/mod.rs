pub mod gateway;
pub mod http_client;
pub mod types;

use crate::channels::traits::{Channel, ChannelMessage, MediaAttachment};
use crate::config::DiscordConfig;
use crate::error::TransportError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use self::gateway::{DiscordGateway, GatewayEvent, GatewaySession};
use self::http_client::DiscordHttpClient;
use self::types::DEFAULT_INTENTS;

pub struct DiscordChannel {
    http: DiscordHttpClient,
    session: Arc<GatewaySession>,
    config: DiscordConfig,
    self_user_id: std::sync::Mutex<Option<String>>,
}

impl DiscordChannel {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            http: DiscordHttpClient::new(&config.bot_token),
            session: Arc::new(GatewaySession::default()),
            config,
            self_user_id: std::sync::Mutex::new(None),
        }
    }

    /// An empty allowlist means every user may trigger downloads.
    fn user_may_trigger(&self, user_id: &str) -> bool {
        let allowed = &self.config.allowed_users;
        allowed.is_empty() || allowed.iter().any(|entry| entry == user_id)
    }

    fn intents(&self) -> u64 {
        self.config.intents.unwrap_or(DEFAULT_INTENTS)
    }

    /// With a pinned guild, only messages from that guild pass; DMs carry no
    /// guild id and are rejected too. A pin left empty in the config file
    /// counts as no pin at all.
    fn guild_passes(&self, guild_id: Option<&str>) -> bool {
        match self.config.guild_id.as_deref().filter(|pin| !pin.is_empty()) {
            Some(pinned) => guild_id.is_some_and(|g| g == pinned),
            None => true,
        }
    }

    fn remember_self(&self, user_id: &str) {
        if let Ok(mut slot) = self.self_user_id.lock() {
            *slot = Some(user_id.to_string());
        }
    }

    fn is_self(&self, user_id: &str) -> bool {
        match self.self_user_id.lock() {
            Ok(slot) => slot.as_deref() == Some(user_id),
            Err(_) => false,
        }
    }

    async fn ingest_event(
        &self,
        event: GatewayEvent,
        tx: &tokio::sync::mpsc::Sender<ChannelMessage>,
    ) {
        match event {
            GatewayEvent::Ready { user_id, .. } => {
                self.remember_self(&user_id);
                tracing::info!("connected to Discord as {user_id}");
            }
            GatewayEvent::MessageCreate {
                channel_id,
                author_id,
                author_is_bot,
                content,
                guild_id,
                message_id,
            } => {
                if author_is_bot || self.is_self(&author_id) {
                    return;
                }
                if !self.user_may_trigger(&author_id) {
                    tracing::warn!("dropping message from user {author_id}: not on the allowlist");
                    return;
                }
                if !self.guild_passes(guild_id.as_deref()) {
                    tracing::debug!("dropping message outside the pinned guild");
                    return;
                }
                if content.is_empty() {
                    return;
                }

                let msg = ChannelMessage {
                    id: Uuid::new_v4().to_string(),
                    sender: author_id,
                    content,
                    channel: "discord".to_string(),
                    conversation_id: Some(channel_id),
                    message_id: Some(message_id),
                    timestamp: now_unix(),
                };
                if tx.send(msg).await.is_err() {
                    tracing::warn!("relay side hung up, discarding Discord message");
                }
            }
        }
    }
}

impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    fn send<'a>(
        &'a self,
        message: &'a str,
        recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.http
                .send_message(recipient, message)
                .await
                .map(|_| ())
                .map_err(|error| {
                    TransportError::Delivery {
                        channel: self.name().to_string(),
                        reason: format!("{error:#}"),
                    }
                    .into()
                })
        })
    }

    fn listen<'a>(
        &'a self,
        tx: tokio::sync::mpsc::Sender<ChannelMessage>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let gateway = DiscordGateway::new(
                self.config.bot_token.clone(),
                self.intents(),
                Arc::clone(&self.session),
            );

            let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<GatewayEvent>(100);

            let gateway_http = DiscordHttpClient::new(&self.config.bot_token);
            let gateway_handle = tokio::spawn(async move {
                gateway.run(&gateway_http, &event_tx).await
            });

            while let Some(event) = event_rx.recv().await {
                self.ingest_event(event, &tx).await;
            }

            // The only sender lives inside the gateway task, so the stream
            // drains to None exactly when that task has finished. Its verdict
            // is the listen result; a gateway failure must never come back
            // as a clean return.
            match gateway_handle.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(TransportError::Lost {
                    channel: self.name().to_string(),
                    reason: format!("{error:#}"),
                }
                .into()),
                Err(e) => anyhow::bail!("gateway task aborted: {e}"),
            }
        })
    }

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { self.http.get_current_user().await.is_ok() })
    }

    fn send_typing<'a>(
        &'a self,
        recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move { self.http.send_typing(recipient).await })
    }

    fn send_media<'a>(
        &'a self,
        attachment: &'a MediaAttachment,
        recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let filename = attachment.filename.as_deref().unwrap_or("attachment");
            self.http
                .send_media(
                    recipient,
                    attachment.data.clone(),
                    filename,
                    &attachment.mime_type,
                )
                .await
        })
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
