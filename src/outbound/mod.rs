//! Outbound transport seam.
//!
//! Delivery talks to platforms through the [`Transport`] trait so the
//! pipeline can be exercised with an in-memory transport in tests.

pub mod card;
pub mod feishu;
pub mod qqbot;

use async_trait::async_trait;

/// Successful send acknowledgement from a platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub chat_id: Option<String>,
}

/// Parsed outbound addressing target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    User(String),
    Group(String),
    Channel(String),
    /// Feishu chat id (`chat:<id>` or bare id).
    Chat(String),
}

impl SendTarget {
    /// Parse the `kind:<id>` addressing scheme. A bare id defaults to a
    /// chat target, matching the original Feishu adapter.
    pub fn parse(to: &str) -> Self {
        if let Some(id) = to.strip_prefix("user:") {
            Self::User(id.to_string())
        } else if let Some(id) = to.strip_prefix("group:") {
            Self::Group(id.to_string())
        } else if let Some(id) = to.strip_prefix("channel:") {
            Self::Channel(id.to_string())
        } else if let Some(id) = to.strip_prefix("chat:") {
            Self::Chat(id.to_string())
        } else {
            Self::Chat(to.to_string())
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::User(id) | Self::Group(id) | Self::Channel(id) | Self::Chat(id) => id,
        }
    }
}

/// Platform send operations used by delivery. Implementations raise
/// transport errors; delivery decides the fallback.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send_text(
        &self,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<SendReceipt>;

    async fn send_media(
        &self,
        to: &str,
        media_url: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<SendReceipt>;
}
