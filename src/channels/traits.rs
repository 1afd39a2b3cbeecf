use std::future::Future;
use std::pin::Pin;

/// A message pulled off a channel's wire, normalized for the relay loop.
///
/// `sender` is the platform user id. `conversation_id` is where replies and
/// uploads are addressed; for Discord that is the text channel id.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub channel: String,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: u64,
}

/// Bytes ready to go out as a file upload.
#[derive(Debug, Clone)]
pub struct MediaAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
    pub filename: Option<String>,
}

/// One messaging platform. Implementations own their wire protocol and
/// surface plain strings and bytes here.
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `message` into the conversation identified by `recipient`.
    fn send<'a>(
        &'a self,
        message: &'a str,
        recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

    /// Run the inbound loop, pushing every accepted message into `tx`.
    /// Returns only when the connection is gone or the receiver hangs up.
    fn listen<'a>(
        &'a self,
        tx: tokio::sync::mpsc::Sender<ChannelMessage>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

    /// True when the platform answers an authenticated round trip.
    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { true })
    }

    /// Best-effort "working on it" signal. Channels without one ignore it.
    fn send_typing<'a>(
        &'a self,
        _recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move { Ok(()) })
    }

    /// Upload a file into the conversation.
    fn send_media<'a>(
        &'a self,
        _attachment: &'a MediaAttachment,
        _recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move { anyhow::bail!("this channel cannot carry file uploads") })
    }
}
