use std::path::{Path, PathBuf};

use crate::channels::traits::{ChannelMessage, MediaAttachment};
use crate::media;
use crate::storage;

use super::replies;
use super::RelayRuntime;

/// Small files go back as attachments and are removed right away; anything
/// over the threshold is parked on the ephemeral file server instead.
pub(super) async fn deliver_file(
    rt: &RelayRuntime,
    msg: &ChannelMessage,
    path: PathBuf,
    size_bytes: u64,
) {
    if size_bytes <= rt.max_attachment_bytes {
        attach_and_discard(rt, msg, &path).await;
    } else {
        host_and_link(rt, msg, path).await;
    }
}

async fn attach_and_discard(rt: &RelayRuntime, msg: &ChannelMessage, path: &Path) {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let mime_type = media::mime_for_file(path).await;

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::error!(%error, file = %path.display(), "could not read downloaded file");
            if let Err(error) = rt.reply_to_origin(msg, replies::REPLY_INTERNAL).await {
                tracing::warn!(%error, "failed to send internal error reply");
            }
            storage::remove_quiet(path).await;
            return;
        }
    };

    let attachment = MediaAttachment {
        mime_type,
        data: bytes,
        filename: Some(filename.clone()),
    };

    match rt.send_media_to_origin(msg, &attachment).await {
        Ok(()) => {
            tracing::info!(filename = %filename, "attachment delivered");
            if let Err(error) = rt.reply_to_origin(msg, replies::REPLY_ATTACHED).await {
                tracing::warn!(%error, "attachment went out but the confirmation reply failed");
            }
        }
        Err(error) => {
            tracing::error!(%error, filename = %filename, "attachment upload failed");
            if let Err(error) = rt.reply_to_origin(msg, replies::REPLY_INTERNAL).await {
                tracing::warn!(%error, "failed to send internal error reply");
            }
        }
    }

    storage::remove_quiet(path).await;
}

async fn host_and_link(rt: &RelayRuntime, msg: &ChannelMessage, path: PathBuf) {
    match rt.server.publish(path.clone()).await {
        Ok(served) => {
            let url = served.url().to_string();
            tracing::info!(
                %url,
                port = served.port(),
                expires_at = %served.expires_at(),
                "file published behind a temporary link"
            );
            match rt.reply_to_origin(msg, &replies::hosted_reply(&url)).await {
                Ok(()) => served.detach(),
                Err(error) => {
                    tracing::warn!(%error, "link reply failed, tearing the server down early");
                    served.close().await;
                }
            }
        }
        Err(error) => {
            let code = error.error_code();
            tracing::error!(%error, code = code.code(), "could not publish file");
            if let Some(reply) = replies::reply_for_code(code) {
                if let Err(error) = rt.reply_to_origin(msg, reply).await {
                    tracing::warn!(%error, "failed to send publish failure reply");
                }
            }
            storage::remove_quiet(&path).await;
        }
    }
}
