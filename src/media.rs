use std::path::Path;
use tokio::io::AsyncReadExt;

const SNIFF_LEN: usize = 8192;

fn sniff_mime(head: &[u8]) -> Option<String> {
    infer::get(head).map(|kind| kind.mime_type().to_string())
}

#[must_use]
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    match ext.to_lowercase().as_str() {
        "mp4" | "m4v" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        "mkv" => Some("video/x-matroska"),
        "mov" => Some("video/quicktime"),
        "avi" => Some("video/x-msvideo"),
        "mp3" => Some("audio/mpeg"),
        "m4a" => Some("audio/mp4"),
        "ogg" => Some("audio/ogg"),
        _ => None,
    }
}

/// Content type for an on-disk download: magic bytes first, extension as
/// fallback, octet-stream when neither knows.
pub async fn mime_for_file(path: &Path) -> String {
    let mut head = vec![0_u8; SNIFF_LEN];
    let sniffed = match tokio::fs::File::open(path).await {
        Ok(mut file) => {
            let read = file.read(&mut head).await.unwrap_or(0);
            sniff_mime(&head[..read])
        }
        Err(_) => None,
    };

    sniffed
        .or_else(|| mime_from_extension(path).map(String::from))
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn sniffer_recognizes_png_magic() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(sniff_mime(&png).as_deref(), Some("image/png"));
    }

    #[test]
    fn sniffer_gives_up_on_junk() {
        let junk = [0x13, 0x37, 0x5A, 0x5A, 0x03];
        assert!(sniff_mime(&junk).is_none());
    }

    #[test]
    fn extension_mapping_covers_video_containers() {
        assert_eq!(
            mime_from_extension(&PathBuf::from("clip.mp4")),
            Some("video/mp4")
        );
        assert_eq!(
            mime_from_extension(&PathBuf::from("clip.WEBM")),
            Some("video/webm")
        );
        assert_eq!(
            mime_from_extension(&PathBuf::from("clip.mkv")),
            Some("video/x-matroska")
        );
        assert_eq!(mime_from_extension(&PathBuf::from("clip.xyz")), None);
        assert_eq!(mime_from_extension(&PathBuf::from("noext")), None);
    }

    #[tokio::test]
    async fn file_mime_falls_back_to_extension_then_octet_stream() {
        let temp = TempDir::new().unwrap();

        let video = temp.path().join("clip.mp4");
        std::fs::write(&video, [0x00, 0x11, 0x22, 0x33]).unwrap();
        assert_eq!(mime_for_file(&video).await, "video/mp4");

        let opaque = temp.path().join("blob.dat");
        std::fs::write(&opaque, [0x00, 0x11, 0x22, 0x33]).unwrap();
        assert_eq!(mime_for_file(&opaque).await, "application/octet-stream");

        let missing = temp.path().join("missing.bin");
        assert_eq!(mime_for_file(&missing).await, "application/octet-stream");
    }
}
