//! Channel configuration schema.
//!
//! All fields carry serde defaults so that a partially-filled TOML table
//! still deserializes; a channel is only disabled by an explicit
//! `enabled = false` or by omitting its table entirely.

use serde::{Deserialize, Serialize};

/// Direct-message admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    #[default]
    Open,
    /// Pairing handshakes are handled by the external runtime; at this layer
    /// a paired sender must already appear in `allow_from`.
    Pairing,
    Allowlist,
}

/// Group/channel admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    #[default]
    Open,
    Allowlist,
    Disabled,
}

/// How reply text is split into platform-sized messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    /// Split on paragraph boundaries, keeping code fences intact.
    #[default]
    Markdown,
    /// Split purely by length, preferring newline/space break points.
    Plain,
}

/// What to do with markdown tables before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    /// Rewrite each table row as a bulleted list (chat clients rarely
    /// render pipe tables).
    #[default]
    Bullets,
    Keep,
}

fn default_true() -> bool {
    true
}

fn default_text_chunk_limit() -> usize {
    1500
}

fn default_feishu_chunk_limit() -> usize {
    4000
}

fn default_history_limit() -> usize {
    10
}

/// QQ open-platform bot channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QqBotConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub markdown_support: bool,
    #[serde(default)]
    pub dm_policy: DmPolicy,
    #[serde(default)]
    pub group_policy: GroupPolicy,
    #[serde(default = "default_true")]
    pub require_mention: bool,
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default)]
    pub group_allow_from: Vec<String>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_text_chunk_limit")]
    pub text_chunk_limit: usize,
    #[serde(default)]
    pub chunk_mode: ChunkMode,
    #[serde(default)]
    pub table_mode: TableMode,
    /// When true, partial payloads of a streamed reply are discarded and only
    /// the final payload is delivered.
    #[serde(default)]
    pub reply_final_only: bool,
}

impl Default for QqBotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_id: None,
            client_secret: None,
            markdown_support: false,
            dm_policy: DmPolicy::default(),
            group_policy: GroupPolicy::default(),
            require_mention: true,
            allow_from: Vec::new(),
            group_allow_from: Vec::new(),
            history_limit: default_history_limit(),
            text_chunk_limit: default_text_chunk_limit(),
            chunk_mode: ChunkMode::default(),
            table_mode: TableMode::default(),
            reply_final_only: false,
        }
    }
}

impl QqBotConfig {
    /// Credentials are required for outbound sends, not for inbound parsing.
    pub fn is_configured(&self) -> bool {
        matches!((&self.app_id, &self.client_secret), (Some(a), Some(s)) if !a.is_empty() && !s.is_empty())
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.app_id.as_deref(), self.client_secret.as_deref()) {
            (Some(a), Some(s)) if !a.is_empty() && !s.is_empty() => Some((a, s)),
            _ => None,
        }
    }
}

/// Feishu (Lark China) channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_secret: Option<String>,
    /// Send reply text as an interactive markdown card instead of a plain
    /// text message. Card mode enables inline image rendering.
    #[serde(default)]
    pub send_markdown_as_card: bool,
    #[serde(default = "default_feishu_chunk_limit")]
    pub text_chunk_limit: usize,
    #[serde(default)]
    pub chunk_mode: ChunkMode,
    #[serde(default)]
    pub table_mode: TableMode,
    #[serde(default)]
    pub reply_final_only: bool,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_id: None,
            app_secret: None,
            send_markdown_as_card: false,
            text_chunk_limit: default_feishu_chunk_limit(),
            chunk_mode: ChunkMode::default(),
            table_mode: TableMode::default(),
            reply_final_only: false,
        }
    }
}

impl FeishuConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.app_id.as_deref(), self.app_secret.as_deref()) {
            (Some(a), Some(s)) if !a.is_empty() && !s.is_empty() => Some((a, s)),
            _ => None,
        }
    }
}

/// Per-channel configuration tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub qqbot: Option<QqBotConfig>,
    #[serde(default)]
    pub feishu: Option<FeishuConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qqbot_config_defaults_optional_fields() {
        let cfg: QqBotConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.dm_policy, DmPolicy::Open);
        assert_eq!(cfg.group_policy, GroupPolicy::Open);
        assert!(cfg.require_mention);
        assert!(cfg.allow_from.is_empty());
        assert_eq!(cfg.text_chunk_limit, 1500);
        assert!(!cfg.reply_final_only);
        assert!(!cfg.is_configured());
    }

    #[test]
    fn qqbot_config_toml_roundtrip() {
        let cfg = QqBotConfig {
            app_id: Some("102001".into()),
            client_secret: Some("s3cret".into()),
            dm_policy: DmPolicy::Allowlist,
            allow_from: vec!["u1".into(), "*".into()],
            reply_final_only: true,
            ..QqBotConfig::default()
        };
        let toml_str = toml::to_string(&cfg).unwrap();
        let parsed: QqBotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.app_id.as_deref(), Some("102001"));
        assert_eq!(parsed.dm_policy, DmPolicy::Allowlist);
        assert_eq!(parsed.allow_from, vec!["u1", "*"]);
        assert!(parsed.reply_final_only);
        assert!(parsed.is_configured());
    }

    #[test]
    fn feishu_config_defaults() {
        let cfg: FeishuConfig = toml::from_str("").unwrap();
        assert!(cfg.enabled);
        assert!(!cfg.send_markdown_as_card);
        assert_eq!(cfg.text_chunk_limit, 4000);
        assert!(cfg.credentials().is_none());
    }

    #[test]
    fn policy_enums_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&DmPolicy::Allowlist).unwrap(), "\"allowlist\"");
        assert_eq!(serde_json::to_string(&GroupPolicy::Disabled).unwrap(), "\"disabled\"");
    }

    #[test]
    fn credentials_reject_empty_strings() {
        let cfg = QqBotConfig {
            app_id: Some(String::new()),
            client_secret: Some("x".into()),
            ..QqBotConfig::default()
        };
        assert!(cfg.credentials().is_none());
    }
}
