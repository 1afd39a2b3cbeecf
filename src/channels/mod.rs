pub mod discord;
pub mod runtime;
pub mod traits;

pub use runtime::supervise_channel;
pub use traits::{Channel, ChannelMessage, MediaAttachment};
