use axum::Router;
use axum::http::{HeaderValue, header};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeFile;
use tower_http::set_header::SetResponseHeaderLayer;
use uuid::Uuid;

use crate::config::{AUTO_PORT_RANGE, PortMode, ServeConfig};
use crate::error::PublishError;
use crate::storage;

/// How long in-flight downloads may finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Publishes a single local file over plain HTTP for a limited time.
///
/// Each publication gets its own listener, a UUID route, and a one-shot
/// expiry timer. When the timer fires the listener stops taking requests,
/// in-flight responses get a bounded grace period, and the file is deleted.
pub struct FileServer {
    public_host: String,
    port: PortMode,
    ttl: Duration,
}

/// Live publication handle. Dropping it tears the server down; [`detach`]
/// hands the lifetime over to the expiry timer instead.
///
/// [`detach`]: ServedFile::detach
#[derive(Debug)]
pub struct ServedFile {
    url: String,
    port: u16,
    expires_at: DateTime<Utc>,
    shutdown: CancellationToken,
    lifecycle: JoinHandle<()>,
    detached: bool,
}

impl FileServer {
    pub fn new(public_host: String, port: PortMode, ttl: Duration) -> Self {
        Self {
            public_host,
            port,
            ttl,
        }
    }

    pub fn from_config(config: &ServeConfig) -> Self {
        Self::new(config.public_host.clone(), config.port.clone(), config.ttl())
    }

    /// Bind, arm the expiry timer, and return the public URL. Never waits for
    /// the TTL; the caller has a working URL the moment this returns.
    pub async fn publish(&self, path: PathBuf) -> Result<ServedFile, PublishError> {
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(PublishError::FileMissing(path.display().to_string()));
        }

        let listener = self.bind().await?;
        let port = listener.local_addr().map_err(PublishError::Io)?.port();

        let id = Uuid::new_v4();
        let url = format!("http://{}:{port}/{id}", self.public_host);
        let deadline = Instant::now() + self.ttl;
        let expires_at = Utc::now()
            + chrono::TimeDelta::try_seconds(self.ttl.as_secs() as i64).unwrap_or_default();

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(sanitize_filename)
            .unwrap_or_else(|| "download".to_string());
        let disposition =
            HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
                .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

        let app = Router::new()
            .route_service(&format!("/{id}"), ServeFile::new(path.clone()))
            .layer(SetResponseHeaderLayer::overriding(
                header::CONTENT_DISPOSITION,
                disposition,
            ));

        let shutdown = CancellationToken::new();
        let lifecycle = spawn_lifecycle(listener, app, path.clone(), deadline, shutdown.clone());

        tracing::info!(
            %url,
            path = %path.display(),
            expires_at = %expires_at.to_rfc3339(),
            "published ephemeral file"
        );

        Ok(ServedFile {
            url,
            port,
            expires_at,
            shutdown,
            lifecycle,
            detached: false,
        })
    }

    async fn bind(&self) -> Result<TcpListener, PublishError> {
        match &self.port {
            PortMode::Fixed(port) => match TcpListener::bind(("0.0.0.0", *port)).await {
                Ok(listener) => Ok(listener),
                Err(e) => {
                    tracing::warn!(port, error = %e, "configured serve port is unavailable");
                    Err(PublishError::PortUnavailable(*port))
                }
            },
            PortMode::Named(_) => {
                let (start, end) = AUTO_PORT_RANGE;
                for port in start..=end {
                    if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)).await {
                        return Ok(listener);
                    }
                }
                Err(PublishError::PortRangeExhausted { start, end })
            }
        }
    }
}

impl ServedFile {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Let the publication live out its TTL without a handle.
    pub fn detach(mut self) {
        self.detached = true;
    }

    /// Tear down before the TTL and wait until the listener is gone and the
    /// file is deleted.
    pub async fn close(mut self) {
        self.detached = true;
        self.shutdown.cancel();
        (&mut self.lifecycle).await.ok();
    }
}

impl Drop for ServedFile {
    fn drop(&mut self) {
        if !self.detached {
            self.shutdown.cancel();
        }
    }
}

fn spawn_lifecycle(
    listener: TcpListener,
    app: Router,
    path: PathBuf,
    deadline: Instant,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let graceful = token.clone();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await });
        let mut serving = tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::warn!(error = %e, "ephemeral file server failed");
            }
        });

        tokio::select! {
            () = token.cancelled() => {
                tracing::debug!(path = %path.display(), "ephemeral file closed before expiry");
            }
            () = tokio::time::sleep_until(deadline) => {
                tracing::info!(path = %path.display(), "ephemeral file expired");
                token.cancel();
            }
        }

        // Listener stops accepting at cancel; stragglers get SHUTDOWN_GRACE.
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut serving).await.is_err() {
            serving.abort();
            serving.await.ok();
        }

        storage::remove_quiet(&path).await;
    })
}

fn sanitize_filename(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        "download".to_string()
    } else {
        safe
    }
}
