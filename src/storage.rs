use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Distinguishes stems handed out within the same second.
static STEM_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Scratch directory where downloads land before delivery.
///
/// Each flight gets its own stem so downloads never collide; the downloader
/// appends whatever extension the media dictates, and [`Scratch::resolve_output`]
/// finds the result afterwards.
#[derive(Debug, Clone)]
pub struct Scratch {
    dir: PathBuf,
}

impl Scratch {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// `dl-<unix seconds>-<n>-<sender>`, sender reduced to filesystem-safe
    /// chars. `<n>` counts up process-wide, so two requests landing in the
    /// same second still get distinct stems.
    pub fn unique_stem(&self, sender: &str) -> String {
        let safe: String = sender
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let seq = STEM_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("dl-{}-{seq}-{safe}", chrono::Utc::now().timestamp())
    }

    pub fn stem_path(&self, stem: &str) -> PathBuf {
        self.dir.join(stem)
    }

    /// Locate the downloaded file for `stem` (`<stem>.<ext>` for whatever
    /// extension the tool chose) and return its path and byte size. Partial
    /// `.part` files are never a result.
    pub async fn resolve_output(&self, stem: &str) -> Option<(PathBuf, u64)> {
        let prefix = format!("{stem}.");
        let mut entries = tokio::fs::read_dir(&self.dir).await.ok()?;
        let mut best: Option<(PathBuf, u64)> = None;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) || name.ends_with(".part") {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let candidate = (entry.path(), meta.len());
            // Largest wins if the tool left more than one artifact behind.
            if best.as_ref().is_none_or(|(_, size)| candidate.1 > *size) {
                best = Some(candidate);
            }
        }

        best
    }

    /// Remove every artifact of `stem`, including partials left by a killed
    /// download. Missing files are fine.
    pub async fn scrub_stem(&self, stem: &str) {
        let prefix = format!("{stem}.");
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str()
                && name.starts_with(&prefix)
            {
                remove_quiet(&entry.path()).await;
            }
        }
    }
}

/// Delete a file, tolerating one that is already gone.
pub async fn remove_quiet(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "file already removed");
            true
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
            false
        }
    }
}

/// Byte counts for humans: `512 B`, `3.4 KB`, `15.0 MB`.
pub fn human_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;

    let bytes_f = bytes as f64;
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes_f < MB {
        format!("{:.1} KB", bytes_f / KB)
    } else {
        format!("{:.1} MB", bytes_f / MB)
    }
}
