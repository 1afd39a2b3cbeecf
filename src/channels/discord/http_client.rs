use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use reqwest::{Method, Response, header::HeaderMap};
use serde_json::json;
use tokio::{sync::Mutex, time::sleep};

use super::types::API_BASE;

const RATE_LIMIT_RETRIES: u8 = 3;

/// Remaining quota for one route, as reported by the last response.
#[derive(Debug, Clone)]
struct RouteBucket {
    remaining: u32,
    reset_at: f64,
}

/// Discord REST client with per-route and global rate-limit tracking.
///
/// Routes are keyed by their path with snowflakes collapsed to `{id}`, so
/// `/channels/123/messages` and `/channels/456/messages` share one bucket
/// key shape but distinct ids never leak into memory unboundedly.
pub struct DiscordHttpClient {
    client: reqwest::Client,
    bot_token: String,
    api_base: String,
    buckets: Arc<Mutex<HashMap<String, RouteBucket>>>,
    global_reset_at: Arc<Mutex<Option<f64>>>,
}

impl DiscordHttpClient {
    #[must_use]
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self::with_api_base(bot_token, API_BASE)
    }

    /// Same client against a different base URL. Tests point this at a
    /// local mock server.
    #[must_use]
    pub fn with_api_base(bot_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            buckets: Arc::new(Mutex::new(HashMap::new())),
            global_reset_at: Arc::new(Mutex::new(None)),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    pub async fn send_message(&self, channel_id: &str, content: &str) -> Result<serde_json::Value> {
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);
        let response = self
            .request(Method::POST, &url, Some(json!({ "content": content })))
            .await
            .context("post message to Discord")?;
        response
            .json()
            .await
            .context("decode message-create response")
    }

    /// Upload a file as a message attachment. Multipart forms cannot be
    /// cloned, so this carries its own retry loop instead of going through
    /// [`Self::request`].
    pub async fn send_media(
        &self,
        channel_id: &str,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> Result<()> {
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);
        let route = route_key(&url);
        self.hold_until_allowed(&route).await;

        for attempt in 0..=RATE_LIMIT_RETRIES {
            let part = reqwest::multipart::Part::bytes(bytes.clone())
                .file_name(filename.to_owned())
                .mime_str(mime_type)
                .context("attachment MIME type rejected")?;
            let form = reqwest::multipart::Form::new().part("files[0]", part);

            let response = self
                .client
                .post(&url)
                .header("Authorization", self.auth())
                .multipart(form)
                .send()
                .await
                .context("upload attachment to Discord")?;

            self.absorb_limit_headers(&route, response.headers()).await;

            if response.status().as_u16() == 429 {
                if attempt == RATE_LIMIT_RETRIES {
                    anyhow::bail!(
                        "attachment upload still rate limited after {RATE_LIMIT_RETRIES} retries"
                    );
                }
                self.record_429_and_wait(response.headers(), &route).await;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let body = read_body_for_error(response).await;
                anyhow::bail!("attachment upload failed ({status}): {body}");
            }

            return Ok(());
        }

        anyhow::bail!("attachment upload gave up after repeated rate limits")
    }

    pub async fn send_typing(&self, channel_id: &str) -> Result<()> {
        let url = format!("{}/channels/{channel_id}/typing", self.api_base);
        self.request(Method::POST, &url, None)
            .await
            .context("trigger typing indicator")?;
        Ok(())
    }

    pub async fn get_current_user(&self) -> Result<serde_json::Value> {
        let url = format!("{}/users/@me", self.api_base);
        let response = self
            .request(Method::GET, &url, None)
            .await
            .context("fetch bot identity")?;
        response.json().await.context("decode bot identity")
    }

    pub async fn get_gateway_bot(&self) -> Result<serde_json::Value> {
        let url = format!("{}/gateway/bot", self.api_base);
        let response = self
            .request(Method::GET, &url, None)
            .await
            .context("fetch gateway connection info")?;
        response
            .json()
            .await
            .context("decode gateway connection info")
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let route = route_key(url);
        self.hold_until_allowed(&route).await;

        for attempt in 0..=RATE_LIMIT_RETRIES {
            let mut builder = self
                .client
                .request(method.clone(), url)
                .header("Authorization", self.auth());
            if let Some(payload) = &body {
                builder = builder.json(payload);
            }

            let response = builder
                .send()
                .await
                .with_context(|| format!("call {} {url}", method.as_str()))?;

            self.absorb_limit_headers(&route, response.headers()).await;

            if response.status().as_u16() == 429 {
                if attempt == RATE_LIMIT_RETRIES {
                    anyhow::bail!(
                        "{} {url} still rate limited after {RATE_LIMIT_RETRIES} retries",
                        method.as_str()
                    );
                }
                self.record_429_and_wait(response.headers(), &route).await;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let body_text = read_body_for_error(response).await;
                anyhow::bail!("{} {url} failed ({status}): {body_text}", method.as_str());
            }

            return Ok(response);
        }

        anyhow::bail!("{} {url} gave up after repeated rate limits", method.as_str())
    }

    /// Sleep out any window the last responses told us about, global first.
    async fn hold_until_allowed(&self, route: &str) {
        if let Some(wait) = self.global_wait().await {
            sleep(wait).await;
        }
        if let Some(wait) = self.route_wait(route).await {
            sleep(wait).await;
        }
    }

    async fn global_wait(&self) -> Option<Duration> {
        let now = unix_now();
        let guard = self.global_reset_at.lock().await;
        guard.and_then(|reset_at| (reset_at > now).then(|| Duration::from_secs_f64(reset_at - now)))
    }

    async fn route_wait(&self, route: &str) -> Option<Duration> {
        let now = unix_now();
        let buckets = self.buckets.lock().await;
        buckets.get(route).and_then(|bucket| {
            (bucket.remaining == 0 && bucket.reset_at > now)
                .then(|| Duration::from_secs_f64(bucket.reset_at - now))
        })
    }

    /// A 429 landed: remember the window it reported, then sit it out.
    async fn record_429_and_wait(&self, headers: &HeaderMap, route: &str) {
        let wait = retry_after(headers).unwrap_or_else(|| Duration::from_secs(1));
        let reset_at = unix_now() + wait.as_secs_f64();

        if global_limited(headers) {
            *self.global_reset_at.lock().await = Some(reset_at);
        } else {
            self.buckets.lock().await.insert(
                route.to_string(),
                RouteBucket {
                    remaining: 0,
                    reset_at,
                },
            );
        }
        sleep(wait).await;
    }

    async fn absorb_limit_headers(&self, route: &str, headers: &HeaderMap) {
        let remaining = header_u32(headers, "X-RateLimit-Remaining");
        let reset_at = header_f64(headers, "X-RateLimit-Reset");

        if let (Some(remaining), Some(reset_at)) = (remaining, reset_at) {
            self.buckets.lock().await.insert(
                route.to_string(),
                RouteBucket {
                    remaining,
                    reset_at,
                },
            );
        }
    }
}

async fn read_body_for_error(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|error| format!("<unreadable body: {error}>"))
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u32>().ok())
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
}

/// `Retry-After` arrives as seconds, possibly fractional.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let seconds = header_f64(headers, "Retry-After")?;
    if seconds <= 0.0 {
        return Some(Duration::ZERO);
    }
    Some(Duration::from_secs_f64(seconds))
}

fn global_limited(headers: &HeaderMap) -> bool {
    headers
        .get("X-RateLimit-Global")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Path of `url` with every all-digit segment replaced by `{id}` and any
/// `/api/v10` prefix dropped.
fn route_key(url: &str) -> String {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    let path = path.strip_prefix("/api/v10").unwrap_or(path.as_str());

    let normalized = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if segment.chars().all(|c| c.is_ascii_digit()) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/");

    format!("/{normalized}")
}
