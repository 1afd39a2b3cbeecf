use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

pub mod ytdlp;

pub use ytdlp::YtDlp;

/// Terminal state of one download flight. Failures are data, not errors;
/// the router maps each variant to its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed { path: PathBuf, size_bytes: u64 },
    TimedOut,
    Failed { reason: String },
}

/// Boundary between the relay loop and whatever fetches media. The real
/// implementation shells out to yt-dlp; tests substitute their own.
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &str;

    /// Download `url` on behalf of `sender`. Never returns before the child
    /// process is dead: a deadline overrun kills it, then reports
    /// [`DownloadOutcome::TimedOut`].
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        sender: &'a str,
    ) -> Pin<Box<dyn Future<Output = DownloadOutcome> + Send + 'a>>;
}
