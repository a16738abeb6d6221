//! Routing resolution and dispatch-context construction.
//!
//! Addressing scheme: outbound targets are `group:<id>`, `channel:<id>` or
//! `user:<id>`; the context `from` field carries a provider prefix
//! (`qqbot:group:<id>` etc.) so downstream consumers can tell channels apart.

use serde::{Deserialize, Serialize};

use crate::inbound::{ChatKind, InboundMessage};

pub const PROVIDER_QQBOT: &str = "qqbot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Dm,
    Group,
}

/// Resolved outbound addressing for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    pub to: String,
    pub peer_id: String,
    pub peer_kind: PeerKind,
}

pub fn resolve_chat_target(message: &InboundMessage) -> ChatTarget {
    match message.kind {
        ChatKind::Group => {
            let group = message.group_id.as_deref().unwrap_or("");
            ChatTarget {
                to: format!("group:{group}"),
                peer_id: format!("group:{group}"),
                peer_kind: PeerKind::Group,
            }
        }
        ChatKind::Channel => {
            let channel = message.channel_id.as_deref().unwrap_or("");
            ChatTarget {
                to: format!("channel:{channel}"),
                peer_id: format!("channel:{channel}"),
                peer_kind: PeerKind::Group,
            }
        }
        ChatKind::Direct => ChatTarget {
            to: format!("user:{}", message.sender_id),
            peer_id: message.sender_id.clone(),
            peer_kind: PeerKind::Dm,
        },
    }
}

/// Display label for "who sent this": group/channel label first, then sender
/// name, then sender id.
pub fn resolve_envelope_from(message: &InboundMessage) -> String {
    match message.kind {
        ChatKind::Group => format!("group:{}", message.group_id.as_deref().unwrap_or("unknown")),
        ChatKind::Channel => {
            format!("channel:{}", message.channel_id.as_deref().unwrap_or("unknown"))
        }
        ChatKind::Direct => message
            .sender_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .unwrap_or_else(|| message.sender_id.clone()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

/// Route produced by the external routing resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub session_key: String,
    pub agent_id: String,
    pub account_id: Option<String>,
    pub main_session_key: Option<String>,
}

/// Canonical envelope handed to the reply engine. Immutable after
/// construction except for [`DispatchContext::augment_body_for_agent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchContext {
    pub body: String,
    pub raw_body: String,
    pub command_body: String,
    pub from: String,
    pub to: String,
    pub session_key: String,
    pub account_id: String,
    pub chat_type: ChatType,
    pub group_subject: Option<String>,
    pub sender_name: Option<String>,
    pub sender_id: String,
    pub provider: String,
    pub message_sid: String,
    pub timestamp: i64,
    pub was_mentioned: bool,
    pub command_authorized: bool,
    pub originating_channel: String,
    pub originating_to: String,
    /// Set only by hidden-prompt augmentation; the display/raw/command bodies
    /// above stay untouched so both versions remain available downstream.
    pub body_for_agent: Option<String>,
}

impl DispatchContext {
    /// Apply a hidden-prompt transformation of the raw body. The transformed
    /// string is attached only when it differs from the input.
    pub fn augment_body_for_agent<F>(&mut self, transform: F)
    where
        F: FnOnce(&str) -> String,
    {
        let base = if !self.raw_body.is_empty() {
            self.raw_body.as_str()
        } else if !self.body.is_empty() {
            self.body.as_str()
        } else {
            self.command_body.as_str()
        };
        if base.is_empty() {
            return;
        }
        let next = transform(base);
        if next != base {
            self.body_for_agent = Some(next);
        }
    }
}

/// Deterministic mapping from an inbound message plus resolved routing info
/// to the canonical dispatch context.
///
/// `body` is the (possibly envelope-formatted) text shown to the agent;
/// `raw_body` and `command_body` default to the message content.
pub fn build_context(
    message: &InboundMessage,
    route: &ResolvedRoute,
    account_id: &str,
    body: Option<String>,
) -> DispatchContext {
    let target = resolve_chat_target(message);
    let chat_type = match message.kind {
        ChatKind::Group | ChatKind::Channel => ChatType::Group,
        ChatKind::Direct => ChatType::Direct,
    };
    let from = match message.kind {
        ChatKind::Group => format!(
            "{PROVIDER_QQBOT}:group:{}",
            message.group_id.as_deref().unwrap_or("")
        ),
        ChatKind::Channel => format!(
            "{PROVIDER_QQBOT}:channel:{}",
            message.channel_id.as_deref().unwrap_or("")
        ),
        ChatKind::Direct => format!("{PROVIDER_QQBOT}:{}", message.sender_id),
    };
    let group_subject = match message.kind {
        ChatKind::Group => message.group_id.clone(),
        ChatKind::Channel => message.channel_id.clone(),
        ChatKind::Direct => None,
    };
    let account_id = route.account_id.clone().unwrap_or_else(|| account_id.to_string());

    DispatchContext {
        body: body.unwrap_or_else(|| message.content.clone()),
        raw_body: message.content.clone(),
        command_body: message.content.clone(),
        from,
        to: target.to.clone(),
        session_key: route.session_key.clone(),
        account_id,
        chat_type,
        group_subject,
        sender_name: message.sender_name.clone(),
        sender_id: message.sender_id.clone(),
        provider: PROVIDER_QQBOT.to_string(),
        message_sid: message.message_id.clone(),
        timestamp: message.timestamp,
        was_mentioned: message.mentioned_bot,
        command_authorized: true,
        originating_channel: PROVIDER_QQBOT.to_string(),
        originating_to: target.to,
        body_for_agent: None,
    }
}
