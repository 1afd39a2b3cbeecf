use anyhow::{Context, Result, bail};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use super::{DownloadOutcome, Fetcher};
use crate::config::DownloadConfig;
use crate::storage::Scratch;

const STDERR_TAIL_LINES: usize = 8;

/// Fetcher backed by the `yt-dlp` binary (or a compatible replacement named
/// in config). One child process per flight, hard deadline, active kill.
pub struct YtDlp {
    program: String,
    scratch: Scratch,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(config: &DownloadConfig) -> Self {
        Self {
            program: config.program.clone(),
            scratch: Scratch::new(config.scratch_dir()),
            timeout: config.timeout(),
        }
    }

    /// `<program> --version`, used by startup preflight and `doctor`.
    pub async fn probe_version(program: &str) -> Result<String> {
        let output = Command::new(program)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("could not run {program} (is it installed and on PATH?)"))?;
        if !output.status.success() {
            bail!("{program} --version exited with {}", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn build_command(&self, url: &str, stem: &str) -> Command {
        let template = self.scratch.stem_path(&format!("{stem}.%(ext)s"));
        let mut cmd = Command::new(&self.program);
        cmd.arg(url)
            .arg("-o")
            .arg(template)
            .arg("--no-playlist")
            .args(["-f", "best[filesize<50M]/best"])
            .args(["--max-filesize", "100M"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, url: &str, sender: &str) -> DownloadOutcome {
        if let Err(e) = self.scratch.ensure().await {
            return DownloadOutcome::Failed {
                reason: format!("scratch dir unavailable: {e}"),
            };
        }

        let stem = self.scratch.unique_stem(sender);
        tracing::debug!(%url, program = %self.program, %stem, "spawning downloader");

        let child = match self.build_command(url, &stem).spawn() {
            Ok(child) => child,
            Err(e) => {
                return DownloadOutcome::Failed {
                    reason: format!("failed to launch {}: {e}", self.program),
                };
            }
        };

        self.supervise(child, &stem).await
    }

    /// Race the child against the deadline. The deadline arm is listed first
    /// under `biased` so a photo-finish goes to cancellation.
    async fn supervise(&self, mut child: Child, stem: &str) -> DownloadOutcome {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let drain = tokio::spawn(async move {
            if let Some(out) = stdout {
                discard_stream(out).await;
            }
        });
        let tail = tokio::spawn(async move {
            match stderr {
                Some(err) => stream_tail(err).await,
                None => String::new(),
            }
        });

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let status = tokio::select! {
            biased;
            () = &mut deadline => {
                tracing::warn!(%stem, timeout_secs = self.timeout.as_secs(), "deadline hit, killing downloader");
                child.kill().await.ok();
                child.wait().await.ok();
                drain.abort();
                tail.abort();
                self.scratch.scrub_stem(stem).await;
                return DownloadOutcome::TimedOut;
            }
            status = child.wait() => status,
        };

        drain.await.ok();
        let stderr_tail = tail.await.unwrap_or_default();

        match status {
            Ok(status) if status.success() => match self.scratch.resolve_output(stem).await {
                Some((path, size_bytes)) => DownloadOutcome::Completed { path, size_bytes },
                None => {
                    self.scratch.scrub_stem(stem).await;
                    DownloadOutcome::Failed {
                        reason: "downloader exited cleanly but produced no output".to_string(),
                    }
                }
            },
            Ok(status) => {
                self.scratch.scrub_stem(stem).await;
                DownloadOutcome::Failed {
                    reason: format!("downloader exited with {status}: {stderr_tail}"),
                }
            }
            Err(e) => {
                self.scratch.scrub_stem(stem).await;
                DownloadOutcome::Failed {
                    reason: format!("could not wait on downloader: {e}"),
                }
            }
        }
    }
}

impl Fetcher for YtDlp {
    fn name(&self) -> &str {
        &self.program
    }

    fn fetch<'a>(
        &'a self,
        url: &'a str,
        sender: &'a str,
    ) -> Pin<Box<dyn Future<Output = DownloadOutcome> + Send + 'a>> {
        Box::pin(async move { self.run(url, sender).await })
    }
}

async fn discard_stream(stream: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(_)) = lines.next_line().await {}
}

/// Keep only the last few lines; yt-dlp puts the useful part at the end.
async fn stream_tail(stream: impl AsyncRead + Unpin) -> String {
    let mut lines = BufReader::new(stream).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fetcher_in(dir: &TempDir, timeout: Duration) -> YtDlp {
        YtDlp {
            program: "yt-dlp".to_string(),
            scratch: Scratch::new(dir.path().to_path_buf()),
            timeout,
        }
    }

    fn piped(cmd: &mut Command) -> Child {
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("test child should spawn")
    }

    #[test]
    fn command_carries_the_expected_flags() {
        let temp = TempDir::new().unwrap();
        let ytdlp = fetcher_in(&temp, Duration::from_secs(300));
        let cmd = ytdlp.build_command("https://example.com/v", "dl-1-u");

        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(cmd.as_std().get_program().to_string_lossy(), "yt-dlp");
        assert_eq!(args[0], "https://example.com/v");
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"best[filesize<50M]/best".to_string()));
        assert!(args.contains(&"--max-filesize".to_string()));
        assert!(
            args.iter().any(|a| a.ends_with("dl-1-u.%(ext)s")),
            "output template should carry the stem: {args:?}"
        );
    }

    #[tokio::test]
    async fn deadline_kills_slow_child() {
        let temp = TempDir::new().unwrap();
        let ytdlp = fetcher_in(&temp, Duration::from_millis(300));
        let child = piped(Command::new("sleep").arg("30"));

        let started = std::time::Instant::now();
        let outcome = ytdlp.supervise(child, "dl-slow-u").await;

        assert_eq!(outcome, DownloadOutcome::TimedOut);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "kill must not wait out the child"
        );
    }

    #[tokio::test]
    async fn clean_exit_with_output_completes() {
        let temp = TempDir::new().unwrap();
        let ytdlp = fetcher_in(&temp, Duration::from_secs(5));
        std::fs::write(temp.path().join("dl-ok-u.mp4"), vec![0_u8; 42]).unwrap();

        let child = piped(Command::new("sh").args(["-c", "exit 0"]));
        let outcome = ytdlp.supervise(child, "dl-ok-u").await;

        match outcome {
            DownloadOutcome::Completed { path, size_bytes } => {
                assert!(path.ends_with("dl-ok-u.mp4"));
                assert_eq!(size_bytes, 42);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clean_exit_without_output_fails() {
        let temp = TempDir::new().unwrap();
        let ytdlp = fetcher_in(&temp, Duration::from_secs(5));

        let child = piped(Command::new("sh").args(["-c", "exit 0"]));
        let outcome = ytdlp.supervise(child, "dl-empty-u").await;

        match outcome {
            DownloadOutcome::Failed { reason } => assert!(reason.contains("no output")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_reports_stderr_tail_and_scrubs_partials() {
        let temp = TempDir::new().unwrap();
        let ytdlp = fetcher_in(&temp, Duration::from_secs(5));
        std::fs::write(temp.path().join("dl-err-u.mp4.part"), b"partial").unwrap();

        let child = piped(Command::new("sh").args(["-c", "echo unsupported url >&2; exit 1"]));
        let outcome = ytdlp.supervise(child, "dl-err-u").await;

        match outcome {
            DownloadOutcome::Failed { reason } => {
                assert!(reason.contains("unsupported url"), "got: {reason}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(
            !temp.path().join("dl-err-u.mp4.part").exists(),
            "partial must be scrubbed after failure"
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_failed_outcome() {
        let temp = TempDir::new().unwrap();
        let ytdlp = YtDlp {
            program: "definitely-not-a-real-downloader".to_string(),
            scratch: Scratch::new(temp.path().to_path_buf()),
            timeout: Duration::from_secs(1),
        };

        let outcome = ytdlp.fetch("https://example.com/v", "user").await;
        match outcome {
            DownloadOutcome::Failed { reason } => assert!(reason.contains("failed to launch")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn probe_version_errors_for_missing_binary() {
        let err = YtDlp::probe_version("definitely-not-a-real-downloader")
            .await
            .expect_err("missing binary should error");
        assert!(err.to_string().contains("could not run"));
    }
}
