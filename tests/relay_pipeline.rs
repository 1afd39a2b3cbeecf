use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::sleep;

use vidrelay::channels::traits::{Channel, ChannelMessage, MediaAttachment};
use vidrelay::config::Config;
use vidrelay::downloader::{DownloadOutcome, Fetcher};
use vidrelay::relay::{RelayRuntime, replies};

#[derive(Default)]
struct RecordingChannel {
    texts: StdMutex<Vec<(String, String)>>,
    media: StdMutex<Vec<(String, String, usize)>>,
    fail_media: AtomicBool,
}

impl RecordingChannel {
    fn texts(&self) -> Vec<(String, String)> {
        self.texts.lock().expect("texts lock").clone()
    }

    fn media(&self) -> Vec<(String, String, usize)> {
        self.media.lock().expect("media lock").clone()
    }
}

impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "discord"
    }

    fn send<'a>(
        &'a self,
        message: &'a str,
        recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.texts
                .lock()
                .expect("texts lock")
                .push((message.to_string(), recipient.to_string()));
            Ok(())
        })
    }

    fn listen<'a>(
        &'a self,
        _tx: tokio::sync::mpsc::Sender<ChannelMessage>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move { Ok(()) })
    }

    fn send_media<'a>(
        &'a self,
        attachment: &'a MediaAttachment,
        _recipient: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_media.load(Ordering::SeqCst) {
                anyhow::bail!("simulated upload failure");
            }
            self.media.lock().expect("media lock").push((
                attachment.filename.clone().unwrap_or_default(),
                attachment.mime_type.clone(),
                attachment.data.len(),
            ));
            Ok(())
        })
    }
}

enum FetchPlan {
    File { bytes: usize },
    Fail(&'static str),
    Timeout,
}

struct ScriptedFetcher {
    plan: FetchPlan,
    delay: Duration,
    dir: PathBuf,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn new(plan: FetchPlan, delay: Duration, dir: &Path) -> Self {
        Self {
            plan,
            delay,
            dir: dir.to_path_buf(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for ScriptedFetcher {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch<'a>(
        &'a self,
        _url: &'a str,
        sender: &'a str,
    ) -> Pin<Box<dyn Future<Output = DownloadOutcome> + Send + 'a>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.delay).await;
            match &self.plan {
                FetchPlan::File { bytes } => {
                    let path = self.dir.join(format!("dl-{call}-{sender}.mp4"));
                    tokio::fs::write(&path, vec![0u8; *bytes])
                        .await
                        .expect("write fake download");
                    DownloadOutcome::Completed {
                        path,
                        size_bytes: *bytes as u64,
                    }
                }
                FetchPlan::Fail(reason) => DownloadOutcome::Failed {
                    reason: (*reason).to_string(),
                },
                FetchPlan::Timeout => DownloadOutcome::TimedOut,
            }
        })
    }
}

fn test_config(max_attachment_bytes: u64) -> Config {
    let mut config = Config::default();
    config.download.max_attachment_bytes = max_attachment_bytes;
    config
}

fn link_message(content: &str) -> ChannelMessage {
    ChannelMessage {
        id: "test-message".to_string(),
        sender: "user-1".to_string(),
        content: content.to_string(),
        channel: "discord".to_string(),
        conversation_id: Some("chan-1".to_string()),
        message_id: Some("m-1".to_string()),
        timestamp: 0,
    }
}

fn build_runtime(
    channel: &Arc<RecordingChannel>,
    fetcher: &Arc<ScriptedFetcher>,
    config: &Config,
) -> Arc<RelayRuntime> {
    let channels: Vec<Arc<dyn Channel>> = vec![Arc::clone(channel) as Arc<dyn Channel>];
    Arc::new(RelayRuntime::new(
        channels,
        Arc::clone(fetcher) as Arc<dyn Fetcher>,
        config,
    ))
}

#[tokio::test]
async fn message_without_link_gets_no_reply_and_no_download() {
    let scratch = TempDir::new().expect("create temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::File { bytes: 16 },
        Duration::ZERO,
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    rt.handle_channel_message(link_message("hola, todo bien por aquí"));
    sleep(Duration::from_millis(100)).await;

    assert_eq!(fetcher.calls(), 0, "no download should be attempted");
    assert!(channel.texts().is_empty(), "no reply should be sent");
    assert!(channel.media().is_empty());
}

#[tokio::test]
async fn small_download_comes_back_as_attachment_and_is_removed() {
    let scratch = TempDir::new().expect("create temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::File { bytes: 512 },
        Duration::ZERO,
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    rt.handle_channel_message(link_message("mira https://example.com/v.mp4"));
    sleep(Duration::from_millis(200)).await;

    let media = channel.media();
    assert_eq!(media.len(), 1, "exactly one attachment should go out");
    assert_eq!(media[0].0, "dl-0-user-1.mp4");
    assert_eq!(media[0].2, 512);

    let texts = channel.texts();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].0, replies::REPLY_ATTACHED);
    assert_eq!(texts[0].1, "chan-1", "reply goes to the origin conversation");

    assert!(
        !scratch.path().join("dl-0-user-1.mp4").exists(),
        "attached file should be deleted from disk"
    );
}

#[tokio::test]
async fn oversized_download_is_hosted_behind_a_link() {
    let scratch = TempDir::new().expect("create temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::File { bytes: 4096 },
        Duration::ZERO,
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    rt.handle_channel_message(link_message("https://example.com/big.mp4"));
    sleep(Duration::from_millis(400)).await;

    assert!(channel.media().is_empty(), "oversized files are not attached");

    let texts = channel.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].0.contains("Enlace temporal"));
    assert!(texts[0].0.contains("http://localhost:"));

    assert!(
        scratch.path().join("dl-0-user-1.mp4").exists(),
        "hosted file must stay on disk while served"
    );
}

#[tokio::test]
async fn file_at_the_limit_attaches_and_one_byte_over_is_hosted() {
    let scratch = TempDir::new().expect("create temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::File { bytes: 1024 },
        Duration::ZERO,
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    rt.handle_channel_message(link_message("https://example.com/exact.mp4"));
    sleep(Duration::from_millis(200)).await;

    assert_eq!(channel.media().len(), 1, "a file at the limit still attaches");
    assert_eq!(channel.texts()[0].0, replies::REPLY_ATTACHED);

    let channel = Arc::new(RecordingChannel::default());
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::File { bytes: 1025 },
        Duration::ZERO,
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    rt.handle_channel_message(link_message("https://example.com/over.mp4"));
    sleep(Duration::from_millis(400)).await;

    assert!(channel.media().is_empty(), "one byte over must not attach");
    assert!(channel.texts()[0].0.contains("Enlace temporal"));
}

#[tokio::test]
async fn failed_download_reports_error_102() {
    let scratch = TempDir::new().expect("create temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::Fail("unsupported url"),
        Duration::ZERO,
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    rt.handle_channel_message(link_message("https://example.com/broken"));
    sleep(Duration::from_millis(100)).await;

    let texts = channel.texts();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].0, replies::REPLY_DOWNLOAD_FAILED);
}

#[tokio::test]
async fn timed_out_download_reports_error_101() {
    let scratch = TempDir::new().expect("create temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::Timeout,
        Duration::ZERO,
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    rt.handle_channel_message(link_message("https://example.com/slow"));
    sleep(Duration::from_millis(100)).await;

    let texts = channel.texts();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].0, replies::REPLY_TIMEOUT);
}

#[tokio::test]
async fn concurrent_request_is_dropped_without_any_reply() {
    let scratch = TempDir::new().expect("create temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::File { bytes: 64 },
        Duration::from_millis(300),
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    rt.handle_channel_message(link_message("https://example.com/first"));
    sleep(Duration::from_millis(50)).await;
    rt.handle_channel_message(link_message("https://example.com/second"));
    sleep(Duration::from_millis(500)).await;

    assert_eq!(fetcher.calls(), 1, "second request must not reach the downloader");
    assert_eq!(
        channel.texts().len(),
        1,
        "only the first request gets a reply; the busy drop is silent"
    );
}

#[tokio::test]
async fn slot_frees_up_after_each_outcome() {
    let scratch = TempDir::new().expect("create temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::Fail("host unreachable"),
        Duration::ZERO,
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    rt.handle_channel_message(link_message("https://example.com/a"));
    sleep(Duration::from_millis(100)).await;
    rt.handle_channel_message(link_message("https://example.com/b"));
    sleep(Duration::from_millis(100)).await;

    assert_eq!(fetcher.calls(), 2, "gate must be released after a failure");
    assert_eq!(channel.texts().len(), 2);
}

#[tokio::test]
async fn attachment_upload_failure_reports_error_110_and_cleans_up() {
    let scratch = TempDir::new().expect("create temp dir");
    let channel = Arc::new(RecordingChannel::default());
    channel.fail_media.store(true, Ordering::SeqCst);
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::File { bytes: 128 },
        Duration::ZERO,
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    rt.handle_channel_message(link_message("https://example.com/v"));
    sleep(Duration::from_millis(200)).await;

    let texts = channel.texts();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].0, replies::REPLY_INTERNAL);
    assert!(
        !scratch.path().join("dl-0-user-1.mp4").exists(),
        "file should be removed even when the upload fails"
    );
}

#[tokio::test]
async fn run_loop_processes_messages_until_senders_close() {
    let scratch = TempDir::new().expect("create temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let fetcher = Arc::new(ScriptedFetcher::new(
        FetchPlan::File { bytes: 32 },
        Duration::ZERO,
        scratch.path(),
    ));
    let rt = build_runtime(&channel, &fetcher, &test_config(1024));

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let loop_handle = tokio::spawn(Arc::clone(&rt).run(rx));

    tx.send(link_message("https://example.com/v"))
        .await
        .expect("send into relay loop");
    drop(tx);

    loop_handle.await.expect("relay loop should finish cleanly");
    sleep(Duration::from_millis(200)).await;

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(channel.texts().len(), 1);
}
