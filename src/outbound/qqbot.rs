//! QQ open-platform bot outbound transport.
//!
//! Text goes through the v2 C2C/group message endpoints (guild channels use
//! the v1 channel endpoint); media is uploaded first to obtain a `file_info`
//! handle and then sent as a rich-media message. App access tokens come from
//! the dedicated token service and are cached until shortly before expiry.

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::{build_http_client, QqBotConfig};
use crate::media::{is_http_url, load_media_bytes};
use crate::outbound::{SendReceipt, SendTarget, Transport};

const QQBOT_API_BASE: &str = "https://api.sgroup.qq.com";
const QQBOT_TOKEN_URL: &str = "https://bots.qq.com/app/getAppAccessToken";
/// Refresh the app token this many seconds before its announced expiry.
const TOKEN_REFRESH_SKEW: Duration = Duration::from_secs(60);
/// Fallback app token TTL when `expires_in` is absent.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7200);

/// Rich-media `file_type` values defined by the QQ bot API.
const FILE_TYPE_IMAGE: u8 = 1;
const FILE_TYPE_VIDEO: u8 = 2;
const FILE_TYPE_VOICE: u8 = 3;
const FILE_TYPE_FILE: u8 = 4;

#[derive(Debug, Clone)]
struct CachedAppToken {
    value: String,
    refresh_after: Instant,
}

fn next_token_refresh_deadline(now: Instant, ttl_seconds: u64) -> Instant {
    let ttl = Duration::from_secs(ttl_seconds.max(1));
    let refresh_in = ttl
        .checked_sub(TOKEN_REFRESH_SKEW)
        .unwrap_or(Duration::from_secs(1));
    now + refresh_in
}

/// Classify a media source by file extension.
fn file_type_for(source: &str) -> u8 {
    let lower = source.trim().to_ascii_lowercase();
    let stem = lower.split(['?', '#']).next().unwrap_or(&lower);
    let ext = stem.rsplit('.').next().unwrap_or("");
    match ext {
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" => FILE_TYPE_IMAGE,
        "mp4" | "mov" | "avi" | "mkv" | "webm" => FILE_TYPE_VIDEO,
        "mp3" | "wav" | "ogg" | "silk" | "amr" | "m4a" => FILE_TYPE_VOICE,
        _ => FILE_TYPE_FILE,
    }
}

fn ensure_send_success(
    status: reqwest::StatusCode,
    body: &Value,
    context: &str,
) -> anyhow::Result<()> {
    if !status.is_success() {
        anyhow::bail!("QQBot send failed {context}: status={status}, body={body}");
    }
    Ok(())
}

#[derive(Clone)]
pub struct QqBotTransport {
    app_id: String,
    client_secret: String,
    api_base: String,
    token_url: String,
    client: reqwest::Client,
    app_token: Arc<RwLock<Option<CachedAppToken>>>,
    /// Monotonic per-process sequence; the API deduplicates replies sharing
    /// a (msg_id, msg_seq) pair.
    msg_seq: Arc<AtomicU64>,
}

impl QqBotTransport {
    pub fn new(config: &QqBotConfig) -> anyhow::Result<Self> {
        let (app_id, client_secret) = config
            .credentials()
            .ok_or_else(|| anyhow::anyhow!("qqbot channel missing app_id/client_secret"))?;
        Ok(Self {
            app_id: app_id.to_string(),
            client_secret: client_secret.to_string(),
            api_base: QQBOT_API_BASE.to_string(),
            token_url: QQBOT_TOKEN_URL.to_string(),
            client: build_http_client(),
            app_token: Arc::new(RwLock::new(None)),
            msg_seq: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Point the transport at different origins. Test hook.
    pub fn with_endpoints(mut self, api_base: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.token_url = token_url.into();
        self
    }

    fn messages_url(&self, target: &SendTarget) -> anyhow::Result<String> {
        let url = match target {
            SendTarget::User(id) => format!("{}/v2/users/{id}/messages", self.api_base),
            SendTarget::Group(id) => format!("{}/v2/groups/{id}/messages", self.api_base),
            SendTarget::Channel(id) => format!("{}/channels/{id}/messages", self.api_base),
            SendTarget::Chat(id) => {
                anyhow::bail!("QQBot: unsupported send target: {id}");
            }
        };
        Ok(url)
    }

    fn files_url(&self, target: &SendTarget) -> anyhow::Result<String> {
        let url = match target {
            SendTarget::User(id) => format!("{}/v2/users/{id}/files", self.api_base),
            SendTarget::Group(id) => format!("{}/v2/groups/{id}/files", self.api_base),
            SendTarget::Channel(id) => {
                anyhow::bail!("QQBot: rich media is not available in guild channel {id}");
            }
            SendTarget::Chat(id) => {
                anyhow::bail!("QQBot: unsupported media target: {id}");
            }
        };
        Ok(url)
    }

    /// Get or refresh the app access token.
    async fn get_app_access_token(&self) -> anyhow::Result<String> {
        {
            let cached = self.app_token.read().await;
            if let Some(ref token) = *cached {
                if Instant::now() < token.refresh_after {
                    return Ok(token.value.clone());
                }
            }
        }

        let body = serde_json::json!({
            "appId": self.app_id,
            "clientSecret": self.client_secret,
        });
        let resp = self.client.post(&self.token_url).json(&body).send().await?;
        let status = resp.status();
        let data: Value = resp.json().await?;

        if !status.is_success() {
            anyhow::bail!("QQBot getAppAccessToken failed: status={status}, body={data}");
        }

        let token = data
            .get("access_token")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing access_token in response: {data}"))?
            .to_string();

        // expires_in arrives as a string in practice; accept both forms.
        let ttl_seconds = data
            .get("expires_in")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(DEFAULT_TOKEN_TTL.as_secs());
        let refresh_after = next_token_refresh_deadline(Instant::now(), ttl_seconds);
        {
            let mut cached = self.app_token.write().await;
            *cached = Some(CachedAppToken {
                value: token.clone(),
                refresh_after,
            });
        }

        Ok(token)
    }

    async fn post_message(
        &self,
        target: &SendTarget,
        body: &Value,
        context: &str,
    ) -> anyhow::Result<SendReceipt> {
        let token = self.get_app_access_token().await?;
        let url = self.messages_url(target)?;
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("QQBot {token}"))
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        let response: Value = resp.json().await.unwrap_or(Value::Null);
        ensure_send_success(status, &response, context)?;

        Ok(SendReceipt {
            message_id: response
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            chat_id: None,
        })
    }

    /// Upload media and return the opaque `file_info` handle.
    async fn upload_media(&self, target: &SendTarget, source: &str) -> anyhow::Result<String> {
        let token = self.get_app_access_token().await?;
        let url = self.files_url(target)?;

        let mut body = serde_json::json!({
            "file_type": file_type_for(source),
            "srv_send_msg": false,
        });
        if is_http_url(source) {
            body["url"] = Value::String(source.to_string());
        } else {
            let (bytes, _) = load_media_bytes(&self.client, source).await?;
            body["file_data"] = Value::String(base64::engine::general_purpose::STANDARD.encode(bytes));
        }

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("QQBot {token}"))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let data: Value = resp.json().await?;
        if !status.is_success() {
            anyhow::bail!("QQBot media upload failed: status={status}, body={data}");
        }
        data.get("file_info")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("QQBot media upload: missing file_info in response"))
    }

    fn next_seq(&self) -> u64 {
        self.msg_seq.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for QqBotTransport {
    fn name(&self) -> &str {
        "qqbot"
    }

    async fn send_text(
        &self,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<SendReceipt> {
        let target = SendTarget::parse(to);
        let mut body = match target {
            // Guild channel messages use the v1 shape without msg_type/seq.
            SendTarget::Channel(_) => serde_json::json!({ "content": text }),
            _ => serde_json::json!({
                "content": text,
                "msg_type": 0,
                "msg_seq": self.next_seq(),
            }),
        };
        if let Some(msg_id) = reply_to {
            body["msg_id"] = Value::String(msg_id.to_string());
        }
        self.post_message(&target, &body, "text").await
    }

    async fn send_media(
        &self,
        to: &str,
        media_url: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<SendReceipt> {
        let target = SendTarget::parse(to);
        let file_info = self.upload_media(&target, media_url).await?;
        let mut body = serde_json::json!({
            "content": " ",
            "msg_type": 7,
            "msg_seq": self.next_seq(),
            "media": { "file_info": file_info },
        });
        if let Some(msg_id) = reply_to {
            body["msg_id"] = Value::String(msg_id.to_string());
        }
        self.post_message(&target, &body, "media").await
    }
}
