//! Feishu outbound transport.
//!
//! Sends via the Open Platform IM API with a cached tenant access token.
//! Markdown replies optionally render as interactive cards with inline
//! images uploaded and substituted by the card builder.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::{build_http_client, FeishuConfig};
use crate::media::load_media_bytes;
use crate::outbound::card::{build_markdown_card_with_images, ImageUploader};
use crate::outbound::{SendReceipt, SendTarget, Transport};

const FEISHU_API_BASE: &str = "https://open.feishu.cn/open-apis";
/// Refresh the tenant token this many seconds before its announced expiry.
const TOKEN_REFRESH_SKEW: Duration = Duration::from_secs(120);
/// Fallback TTL when the token response omits `expire`.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7200);

#[derive(Debug, Clone)]
struct CachedTenantToken {
    value: String,
    refresh_after: Instant,
}

fn extract_response_code(body: &Value) -> Option<i64> {
    body.get("code").and_then(|c| c.as_i64())
}

fn extract_token_ttl_seconds(body: &Value) -> u64 {
    body.get("expire")
        .or_else(|| body.get("expires_in"))
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_TOKEN_TTL.as_secs())
        .max(1)
}

fn next_token_refresh_deadline(now: Instant, ttl_seconds: u64) -> Instant {
    let ttl = Duration::from_secs(ttl_seconds.max(1));
    let refresh_in = ttl
        .checked_sub(TOKEN_REFRESH_SKEW)
        .unwrap_or(Duration::from_secs(1));
    now + refresh_in
}

fn ensure_send_success(
    status: reqwest::StatusCode,
    body: &Value,
    context: &str,
) -> anyhow::Result<()> {
    if !status.is_success() {
        anyhow::bail!("Feishu send failed {context}: status={status}, body={body}");
    }
    let code = extract_response_code(body).unwrap_or(0);
    if code != 0 {
        anyhow::bail!("Feishu send failed {context}: code={code}, body={body}");
    }
    Ok(())
}

/// `receive_id_type` query value for an addressing target. Groups and
/// channels do not exist in Feishu addressing; they map to chat ids.
fn receive_id_type(target: &SendTarget) -> &'static str {
    match target {
        SendTarget::User(_) => "open_id",
        SendTarget::Group(_) | SendTarget::Channel(_) | SendTarget::Chat(_) => "chat_id",
    }
}

#[derive(Clone)]
pub struct FeishuTransport {
    app_id: String,
    app_secret: String,
    api_base: String,
    send_markdown_as_card: bool,
    client: reqwest::Client,
    tenant_token: Arc<RwLock<Option<CachedTenantToken>>>,
}

impl FeishuTransport {
    pub fn new(config: &FeishuConfig) -> anyhow::Result<Self> {
        let (app_id, app_secret) = config
            .credentials()
            .ok_or_else(|| anyhow::anyhow!("feishu channel missing app_id/app_secret"))?;
        Ok(Self {
            app_id: app_id.to_string(),
            app_secret: app_secret.to_string(),
            api_base: FEISHU_API_BASE.to_string(),
            send_markdown_as_card: config.send_markdown_as_card,
            client: build_http_client(),
            tenant_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Point the transport at a different API origin. Test hook.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn tenant_access_token_url(&self) -> String {
        format!("{}/auth/v3/tenant_access_token/internal", self.api_base)
    }

    fn send_message_url(&self, target: &SendTarget) -> String {
        format!(
            "{}/im/v1/messages?receive_id_type={}",
            self.api_base,
            receive_id_type(target)
        )
    }

    fn upload_image_url(&self) -> String {
        format!("{}/im/v1/images", self.api_base)
    }

    /// Get or refresh the tenant access token.
    async fn get_tenant_access_token(&self) -> anyhow::Result<String> {
        {
            let cached = self.tenant_token.read().await;
            if let Some(ref token) = *cached {
                if Instant::now() < token.refresh_after {
                    return Ok(token.value.clone());
                }
            }
        }

        let body = serde_json::json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        });
        let resp = self
            .client
            .post(self.tenant_access_token_url())
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let data: Value = resp.json().await?;

        if !status.is_success() {
            anyhow::bail!("Feishu tenant_access_token request failed: status={status}, body={data}");
        }
        let code = extract_response_code(&data).unwrap_or(-1);
        if code != 0 {
            let msg = data
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            anyhow::bail!("Feishu tenant_access_token failed: {msg}");
        }

        let token = data
            .get("tenant_access_token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing tenant_access_token in response"))?
            .to_string();

        let ttl_seconds = extract_token_ttl_seconds(&data);
        let refresh_after = next_token_refresh_deadline(Instant::now(), ttl_seconds);
        {
            let mut cached = self.tenant_token.write().await;
            *cached = Some(CachedTenantToken {
                value: token.clone(),
                refresh_after,
            });
        }

        Ok(token)
    }

    async fn send_message(
        &self,
        target: &SendTarget,
        msg_type: &str,
        content: &Value,
        context: &str,
    ) -> anyhow::Result<SendReceipt> {
        let token = self.get_tenant_access_token().await?;
        let body = serde_json::json!({
            "receive_id": target.id(),
            "msg_type": msg_type,
            "content": content.to_string(),
        });
        let resp = self
            .client
            .post(self.send_message_url(target))
            .header("Authorization", format!("Bearer {token}"))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let response: Value = resp.json().await?;
        ensure_send_success(status, &response, context)?;

        Ok(SendReceipt {
            message_id: response
                .pointer("/data/message_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            chat_id: response
                .pointer("/data/chat_id")
                .and_then(|v| v.as_str())
                .map(String::from),
        })
    }

    /// Upload image bytes and return the `image_key`.
    async fn upload_image_bytes(
        &self,
        image_bytes: Vec<u8>,
        filename: &str,
    ) -> anyhow::Result<String> {
        let token = self.get_tenant_access_token().await?;
        let part = reqwest::multipart::Part::bytes(image_bytes)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new()
            .text("image_type", "message")
            .part("image", part);
        let resp = self
            .client
            .post(self.upload_image_url())
            .header("Authorization", format!("Bearer {token}"))
            .multipart(form)
            .send()
            .await?;
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            anyhow::bail!("Feishu upload_image failed: status={status}, body={body}");
        }
        let code = extract_response_code(&body).unwrap_or(-1);
        if code != 0 {
            anyhow::bail!("Feishu upload_image failed: code={code}, body={body}");
        }
        body.pointer("/data/image_key")
            .and_then(|k| k.as_str())
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("Feishu upload_image: missing image_key in response"))
    }

    /// Fetch a URL or read a local path, then upload as a message image.
    async fn upload_image_source(&self, source: &str) -> anyhow::Result<String> {
        let (bytes, filename) = load_media_bytes(&self.client, source).await?;
        self.upload_image_bytes(bytes, &filename).await
    }
}

#[async_trait]
impl ImageUploader for FeishuTransport {
    async fn upload(&self, source: &str) -> anyhow::Result<String> {
        self.upload_image_source(source).await
    }
}

#[async_trait]
impl Transport for FeishuTransport {
    fn name(&self) -> &str {
        "feishu"
    }

    async fn send_text(
        &self,
        to: &str,
        text: &str,
        _reply_to: Option<&str>,
    ) -> anyhow::Result<SendReceipt> {
        let target = SendTarget::parse(to);
        if self.send_markdown_as_card {
            let card = build_markdown_card_with_images(text, self).await;
            return self.send_message(&target, "interactive", &card, "card").await;
        }
        let content = serde_json::json!({ "text": text });
        self.send_message(&target, "text", &content, "text").await
    }

    async fn send_media(
        &self,
        to: &str,
        media_url: &str,
        _reply_to: Option<&str>,
    ) -> anyhow::Result<SendReceipt> {
        let target = SendTarget::parse(to);
        let image_key = self.upload_image_source(media_url).await?;
        let content = serde_json::json!({ "image_key": image_key });
        self.send_message(&target, "image", &content, "image").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_deadline_applies_skew() {
        let now = Instant::now();
        let deadline = next_token_refresh_deadline(now, 7200);
        assert_eq!(deadline - now, Duration::from_secs(7080));
    }

    #[test]
    fn refresh_deadline_short_ttl_stays_positive() {
        let now = Instant::now();
        let deadline = next_token_refresh_deadline(now, 60);
        assert_eq!(deadline - now, Duration::from_secs(1));
    }

    #[test]
    fn token_ttl_falls_back_to_default() {
        let body = serde_json::json!({ "code": 0 });
        assert_eq!(extract_token_ttl_seconds(&body), 7200);
        let body = serde_json::json!({ "expire": 600 });
        assert_eq!(extract_token_ttl_seconds(&body), 600);
    }

    #[test]
    fn send_success_requires_zero_code() {
        let ok = serde_json::json!({ "code": 0 });
        assert!(ensure_send_success(reqwest::StatusCode::OK, &ok, "text").is_ok());
        let bad = serde_json::json!({ "code": 99991663, "msg": "token invalid" });
        assert!(ensure_send_success(reqwest::StatusCode::OK, &bad, "text").is_err());
        assert!(ensure_send_success(reqwest::StatusCode::BAD_GATEWAY, &ok, "text").is_err());
    }

    #[test]
    fn receive_id_type_by_target() {
        assert_eq!(receive_id_type(&SendTarget::parse("user:ou_1")), "open_id");
        assert_eq!(receive_id_type(&SendTarget::parse("chat:oc_1")), "chat_id");
        assert_eq!(receive_id_type(&SendTarget::parse("oc_bare")), "chat_id");
    }
}
