//! Access-policy gates.
//!
//! A rejected message is logged and dropped before any session write or
//! outbound call happens; the gate itself has no side effects.

use crate::config::{DmPolicy, GroupPolicy, QqBotConfig};
use crate::inbound::{ChatKind, InboundMessage};

/// Outcome of a policy check. `reason` is set only on rejection and is meant
/// for logs, not for users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<&'static str>,
}

impl PolicyDecision {
    const ALLOW: Self = Self { allowed: true, reason: None };

    const fn deny(reason: &'static str) -> Self {
        Self { allowed: false, reason: Some(reason) }
    }
}

/// `*` acts as a wildcard entry in allow-lists.
fn list_allows(list: &[String], id: &str) -> bool {
    list.iter().any(|entry| entry == "*" || entry == id)
}

pub fn check_dm_policy(policy: DmPolicy, sender_id: &str, allow_from: &[String]) -> PolicyDecision {
    match policy {
        DmPolicy::Open => PolicyDecision::ALLOW,
        DmPolicy::Allowlist => {
            if list_allows(allow_from, sender_id) {
                PolicyDecision::ALLOW
            } else {
                PolicyDecision::deny("sender not in allow_from")
            }
        }
        // Pairing is negotiated by the external runtime; an unpaired sender
        // is simply not in the list yet.
        DmPolicy::Pairing => {
            if list_allows(allow_from, sender_id) {
                PolicyDecision::ALLOW
            } else {
                PolicyDecision::deny("pairing required")
            }
        }
    }
}

pub fn check_group_policy(
    policy: GroupPolicy,
    conversation_id: &str,
    group_allow_from: &[String],
    require_mention: bool,
    mentioned_bot: bool,
) -> PolicyDecision {
    match policy {
        GroupPolicy::Disabled => return PolicyDecision::deny("group messages disabled"),
        GroupPolicy::Allowlist => {
            if !list_allows(group_allow_from, conversation_id) {
                return PolicyDecision::deny("conversation not in group_allow_from");
            }
        }
        GroupPolicy::Open => {}
    }
    if require_mention && !mentioned_bot {
        return PolicyDecision::deny("bot not mentioned");
    }
    PolicyDecision::ALLOW
}

/// Gate an inbound message against the channel config. Rejections are logged
/// at info; the caller returns without further processing.
pub fn should_handle(message: &InboundMessage, cfg: &QqBotConfig) -> bool {
    match message.kind {
        ChatKind::Direct => {
            let decision = check_dm_policy(cfg.dm_policy, &message.sender_id, &cfg.allow_from);
            if !decision.allowed {
                tracing::info!(
                    sender = %message.sender_id,
                    "dm blocked: {}",
                    decision.reason.unwrap_or("policy")
                );
            }
            decision.allowed
        }
        ChatKind::Group | ChatKind::Channel => {
            let conversation_id = match message.kind {
                ChatKind::Group => message.group_id.as_deref().unwrap_or(""),
                _ => message.channel_id.as_deref().unwrap_or(""),
            };
            let decision = check_group_policy(
                cfg.group_policy,
                conversation_id,
                &cfg.group_allow_from,
                cfg.require_mention,
                message.mentioned_bot,
            );
            if !decision.allowed {
                tracing::info!(
                    conversation = %conversation_id,
                    "group blocked: {}",
                    decision.reason.unwrap_or("policy")
                );
            }
            decision.allowed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_message(mentioned: bool) -> InboundMessage {
        InboundMessage {
            kind: ChatKind::Group,
            sender_id: "u1".into(),
            sender_name: None,
            content: "hi".into(),
            message_id: "m1".into(),
            timestamp: 0,
            group_id: Some("g1".into()),
            channel_id: None,
            guild_id: None,
            mentioned_bot: mentioned,
        }
    }

    #[test]
    fn dm_open_allows_anyone() {
        assert!(check_dm_policy(DmPolicy::Open, "anyone", &[]).allowed);
    }

    #[test]
    fn dm_allowlist_checks_sender() {
        let allow = vec!["u1".to_string()];
        assert!(check_dm_policy(DmPolicy::Allowlist, "u1", &allow).allowed);
        let denied = check_dm_policy(DmPolicy::Allowlist, "u2", &allow);
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some("sender not in allow_from"));
    }

    #[test]
    fn dm_allowlist_wildcard() {
        let allow = vec!["*".to_string()];
        assert!(check_dm_policy(DmPolicy::Allowlist, "anyone", &allow).allowed);
    }

    #[test]
    fn dm_pairing_rejects_unknown_sender() {
        let denied = check_dm_policy(DmPolicy::Pairing, "u9", &["u1".to_string()]);
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some("pairing required"));
        assert!(check_dm_policy(DmPolicy::Pairing, "u1", &["u1".to_string()]).allowed);
    }

    #[test]
    fn group_disabled_rejects_everything() {
        let denied = check_group_policy(GroupPolicy::Disabled, "g1", &["g1".to_string()], false, true);
        assert!(!denied.allowed);
    }

    #[test]
    fn group_allowlist_checks_conversation() {
        let allow = vec!["g1".to_string()];
        assert!(check_group_policy(GroupPolicy::Allowlist, "g1", &allow, false, false).allowed);
        assert!(!check_group_policy(GroupPolicy::Allowlist, "g2", &allow, false, false).allowed);
    }

    #[test]
    fn mention_requirement_gates_group_messages() {
        let denied = check_group_policy(GroupPolicy::Open, "g1", &[], true, false);
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some("bot not mentioned"));
        assert!(check_group_policy(GroupPolicy::Open, "g1", &[], true, true).allowed);
    }

    #[test]
    fn should_handle_mention_gating_both_ways() {
        let cfg = QqBotConfig { require_mention: true, ..QqBotConfig::default() };
        assert!(!should_handle(&group_message(false), &cfg));
        assert!(should_handle(&group_message(true), &cfg));
    }

    #[test]
    fn should_handle_channel_uses_channel_id() {
        let cfg = QqBotConfig {
            group_policy: GroupPolicy::Allowlist,
            group_allow_from: vec!["c1".to_string()],
            require_mention: false,
            ..QqBotConfig::default()
        };
        let msg = InboundMessage {
            kind: ChatKind::Channel,
            sender_id: "u1".into(),
            sender_name: None,
            content: "hi".into(),
            message_id: "m1".into(),
            timestamp: 0,
            group_id: None,
            channel_id: Some("c1".into()),
            guild_id: None,
            mentioned_bot: true,
        };
        assert!(should_handle(&msg, &cfg));
    }
}
