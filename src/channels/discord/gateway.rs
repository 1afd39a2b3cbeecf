use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::{Instant, interval};
use tokio_tungstenite::tungstenite::Message;

use super::types::{DEFAULT_HEARTBEAT_INTERVAL_MS, GatewayOpcode};

/// Heartbeat bookkeeping for one gateway connection. Owned by the single
/// read/write task, so plain fields suffice.
struct Heartbeat {
    interval_ms: u64,
    acked: bool,
    deadline: Option<Instant>,
}

impl Heartbeat {
    fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            acked: true,
            deadline: None,
        }
    }

    fn mark_sent(&mut self) {
        self.acked = false;
        self.deadline = Some(Instant::now() + Duration::from_millis(self.interval_ms));
    }

    fn mark_acked(&mut self) {
        self.acked = true;
        self.deadline = None;
    }
}

/// Session identity that survives reconnects: the session id, the last seen
/// sequence number, and the URL Discord wants resumes sent to. -1 means no
/// sequence has been seen yet.
#[derive(Debug)]
pub struct GatewaySession {
    pub session_id: Mutex<Option<String>>,
    pub sequence: AtomicI64,
    pub resume_gateway_url: Mutex<Option<String>>,
}

impl Default for GatewaySession {
    fn default() -> Self {
        Self {
            session_id: Mutex::new(None),
            sequence: AtomicI64::new(-1),
            resume_gateway_url: Mutex::new(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    MessageCreate {
        channel_id: String,
        author_id: String,
        author_is_bot: bool,
        content: String,
        guild_id: Option<String>,
        message_id: String,
    },
    Ready {
        session_id: String,
        resume_gateway_url: String,
        user_id: String,
    },
}

pub struct DiscordGateway {
    bot_token: String,
    intents: u64,
    session: Arc<GatewaySession>,
}

impl DiscordGateway {
    pub fn new(bot_token: String, intents: u64, session: Arc<GatewaySession>) -> Self {
        Self {
            bot_token,
            intents,
            session,
        }
    }

    pub async fn run(
        &self,
        http: &super::http_client::DiscordHttpClient,
        tx: &tokio::sync::mpsc::Sender<GatewayEvent>,
    ) -> Result<()> {
        let ws_url = gateway_ws_url(&self.gateway_base_url(http).await?);

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .with_context(|| format!("gateway websocket connect failed: {ws_url}"))?;
        let (mut write, mut read) = ws_stream.split();

        let mut beat = Heartbeat::new(hello_interval_ms(&mut read).await?);
        self.authenticate(&mut write).await?;

        let mut ticker = interval(Duration::from_millis(beat.interval_ms));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.send_heartbeat(&mut write, &mut beat).await? {
                        tracing::warn!("gateway heartbeat went unanswered, dropping connection");
                        return Ok(());
                    }
                }
                () = ack_overdue(beat.deadline) => {
                    if !beat.acked {
                        tracing::warn!("gateway heartbeat ACK deadline passed, dropping connection");
                        return Ok(());
                    }
                    beat.deadline = None;
                }
                message = read.next() => {
                    let Some(message) = message else {
                        tracing::warn!("gateway socket closed by the other side");
                        return Ok(());
                    };

                    let message = message.context("read gateway frame")?;
                    if !self.handle_frame(message, tx, &mut write, &mut beat).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Prefer the resume URL remembered from READY; otherwise ask the REST
    /// API where to connect.
    async fn gateway_base_url(
        &self,
        http: &super::http_client::DiscordHttpClient,
    ) -> Result<String> {
        let remembered = self.session.resume_gateway_url.lock().await.clone();
        if let Some(url) = remembered.filter(|url| !url.is_empty()) {
            return Ok(url);
        }

        let info = http
            .get_gateway_bot()
            .await
            .context("look up gateway URL via /gateway/bot")?;
        Ok(info
            .get("url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("wss://gateway.discord.gg")
            .to_string())
    }

    /// Resume the previous session when one is on record; identify fresh
    /// otherwise.
    async fn authenticate<WsSink>(&self, write: &mut WsSink) -> Result<()>
    where
        WsSink: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let payload = if let Some(session_id) = self.session.session_id.lock().await.clone() {
            json!({
                "op": GatewayOpcode::Resume as u8,
                "d": {
                    "token": self.bot_token,
                    "session_id": session_id,
                    "seq": self.sequence_i64(),
                }
            })
        } else {
            json!({
                "op": GatewayOpcode::Identify as u8,
                "d": {
                    "token": self.bot_token,
                    "intents": self.intents,
                    "properties": {
                        "os": std::env::consts::OS,
                        "browser": "vidrelay",
                        "device": "vidrelay"
                    }
                },
            })
        };

        write
            .send(Message::Text(payload.to_string().into()))
            .await
            .context("send gateway resume/identify")
    }

    /// False when a previous heartbeat is still unacknowledged, which is the
    /// zombie-connection signal.
    async fn send_heartbeat<WsSink>(&self, write: &mut WsSink, beat: &mut Heartbeat) -> Result<bool>
    where
        WsSink: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        if !beat.acked {
            return Ok(false);
        }

        let payload = json!({
            "op": GatewayOpcode::Heartbeat as u8,
            "d": self.sequence_json(),
        });

        write
            .send(Message::Text(payload.to_string().into()))
            .await
            .context("send gateway heartbeat")?;

        beat.mark_sent();
        Ok(true)
    }

    /// Returns false when the connection should be torn down and redialed.
    async fn handle_frame<WsSink>(
        &self,
        message: Message,
        tx: &tokio::sync::mpsc::Sender<GatewayEvent>,
        write: &mut WsSink,
        beat: &mut Heartbeat,
    ) -> Result<bool>
    where
        WsSink: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let Some(raw) = message_text(message) else {
            return Ok(true);
        };

        let payload: serde_json::Value =
            serde_json::from_str(&raw).context("decode gateway payload")?;

        if let Some(sequence) = payload.get("s").and_then(serde_json::Value::as_i64) {
            self.session.sequence.store(sequence, Ordering::SeqCst);
        }

        match opcode(&payload) {
            Some(GatewayOpcode::Heartbeat) => {
                // Server asked for an immediate beat.
                if !self.send_heartbeat(write, beat).await? {
                    return Ok(false);
                }
                Ok(true)
            }
            Some(GatewayOpcode::HeartbeatAck) => {
                beat.mark_acked();
                Ok(true)
            }
            Some(GatewayOpcode::Reconnect) => {
                tracing::info!("gateway asked us to reconnect");
                Ok(false)
            }
            Some(GatewayOpcode::InvalidSession) => {
                self.on_invalid_session(&payload).await?;
                Ok(false)
            }
            Some(GatewayOpcode::Dispatch) => {
                self.handle_dispatch(&payload, tx).await?;
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    async fn handle_dispatch(
        &self,
        payload: &serde_json::Value,
        tx: &tokio::sync::mpsc::Sender<GatewayEvent>,
    ) -> Result<()> {
        let Some(data) = payload.get("d") else {
            return Ok(());
        };
        let event_type = payload
            .get("t")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");

        let Some(event) = event_from_dispatch(event_type, data) else {
            return Ok(());
        };
        if let GatewayEvent::Ready {
            session_id,
            resume_gateway_url,
            ..
        } = &event
        {
            self.remember_session(session_id, resume_gateway_url).await;
        }
        tx.send(event)
            .await
            .context("forward gateway event to the channel")
    }

    async fn remember_session(&self, session_id: &str, resume_gateway_url: &str) {
        *self.session.session_id.lock().await = Some(session_id.to_string());
        *self.session.resume_gateway_url.lock().await = Some(resume_gateway_url.to_string());
    }

    async fn on_invalid_session(&self, payload: &serde_json::Value) -> Result<()> {
        let resumable = payload
            .get("d")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        self.session.sequence.store(-1, Ordering::SeqCst);
        *self.session.session_id.lock().await = None;

        if !resumable {
            tracing::warn!("gateway session invalidated for good, starting over");
            *self.session.resume_gateway_url.lock().await = None;
            return Ok(());
        }

        let wait_secs = resume_retry_delay_secs();
        tracing::warn!("gateway session invalidated, retrying in {wait_secs}s");
        tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        Ok(())
    }

    /// Discord wants a literal `null` until the first sequence number lands.
    fn sequence_json(&self) -> serde_json::Value {
        match self.sequence_i64() {
            seq if seq < 0 => serde_json::Value::Null,
            seq => json!(seq),
        }
    }

    fn sequence_i64(&self) -> i64 {
        self.session.sequence.load(Ordering::SeqCst)
    }
}

fn opcode(payload: &serde_json::Value) -> Option<GatewayOpcode> {
    payload
        .get("op")
        .and_then(serde_json::Value::as_u64)
        .and_then(GatewayOpcode::from_u64)
}

/// Map a dispatch (`op` 0) payload onto the two event kinds the relay
/// cares about. Everything else is dropped here.
pub fn event_from_dispatch(event_type: &str, d: &serde_json::Value) -> Option<GatewayEvent> {
    match event_type {
        "READY" => ready_from(d),
        "MESSAGE_CREATE" => message_create_from(d),
        "RESUMED" => {
            tracing::info!("gateway session resumed where it left off");
            None
        }
        _ => None,
    }
}

fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(str::to_string)
}

fn ready_from(d: &serde_json::Value) -> Option<GatewayEvent> {
    Some(GatewayEvent::Ready {
        session_id: str_field(d, "session_id")?,
        resume_gateway_url: str_field(d, "resume_gateway_url")?,
        user_id: str_field(d.get("user")?, "id")?,
    })
}

fn message_create_from(d: &serde_json::Value) -> Option<GatewayEvent> {
    let author = d.get("author")?;
    Some(GatewayEvent::MessageCreate {
        channel_id: str_field(d, "channel_id")?,
        author_id: str_field(author, "id")?,
        author_is_bot: author
            .get("bot")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
        content: str_field(d, "content").unwrap_or_default(),
        guild_id: str_field(d, "guild_id"),
        message_id: str_field(d, "id")?,
    })
}

/// Resolves when the pending heartbeat ACK is overdue; idles forever while
/// no heartbeat is outstanding.
async fn ack_overdue(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures_util::future::pending::<()>().await,
    }
}

/// Drain frames until Hello arrives and report its heartbeat interval.
async fn hello_interval_ms<WsRead>(read: &mut WsRead) -> Result<u64>
where
    WsRead:
        Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        let Some(raw) = message_text(frame.context("read gateway hello frame")?) else {
            continue;
        };
        let payload: serde_json::Value =
            serde_json::from_str(&raw).context("decode gateway hello")?;
        if opcode(&payload) != Some(GatewayOpcode::Hello) {
            continue;
        }

        return Ok(payload
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS));
    }

    Err(anyhow::anyhow!("gateway closed before sending Hello"))
}

fn message_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.to_string()),
        Message::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok(),
        _ => None,
    }
}

fn gateway_ws_url(base_url: &str) -> String {
    format!("{}/?v=10&encoding=json", base_url.trim_end_matches('/'))
}

/// 1-5 seconds, as the reconnect guidance asks, without dragging in an RNG.
fn resume_retry_delay_secs() -> u64 {
    let jitter = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| u64::from(since.subsec_nanos()) % 5);
    1 + jitter
}
