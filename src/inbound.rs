//! Inbound event normalization.
//!
//! Raw platform events arrive as an event-type tag plus an opaque JSON
//! payload. Each supported event kind maps to exactly one canonical
//! [`InboundMessage`] or to `None`; malformed payloads are dropped here so
//! the rest of the pipeline never sees a partial message.

use serde_json::Value;

/// Where the message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Direct,
    Group,
    Channel,
}

/// Canonical inbound event, produced once per raw event and consumed once by
/// context building.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub kind: ChatKind,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub content: String,
    pub message_id: String,
    /// Milliseconds since the Unix epoch; defaults to now when the payload
    /// carries no usable timestamp.
    pub timestamp: i64,
    pub group_id: Option<String>,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    /// True when the platform only emits this event kind if the bot was
    /// addressed (group @-mention and channel at-message events).
    pub mentioned_bot: bool,
}

/// Non-empty trimmed string, or `None`.
fn non_empty(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?;
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Timestamps arrive either as an integer (milliseconds) or as a date string.
fn parse_timestamp(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_else(now_millis),
        Some(Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|_| now_millis()),
        _ => now_millis(),
    }
}

fn parse_c2c_message(data: &Value) -> Option<InboundMessage> {
    let content = non_empty(data.get("content"))?;
    let message_id = non_empty(data.get("id"))?;
    let sender_id = non_empty(data.pointer("/author/user_openid"))?;
    Some(InboundMessage {
        kind: ChatKind::Direct,
        sender_id,
        sender_name: non_empty(data.pointer("/author/username")),
        content,
        message_id,
        timestamp: parse_timestamp(data.get("timestamp")),
        group_id: None,
        channel_id: None,
        guild_id: None,
        mentioned_bot: false,
    })
}

fn parse_group_message(data: &Value) -> Option<InboundMessage> {
    let content = non_empty(data.get("content"))?;
    let message_id = non_empty(data.get("id"))?;
    let group_id = non_empty(data.get("group_openid"))?;
    let sender_id = non_empty(data.pointer("/author/member_openid"))?;
    let sender_name = non_empty(data.pointer("/author/nickname"))
        .or_else(|| non_empty(data.pointer("/author/username")));
    Some(InboundMessage {
        kind: ChatKind::Group,
        sender_id,
        sender_name,
        content,
        message_id,
        timestamp: parse_timestamp(data.get("timestamp")),
        group_id: Some(group_id),
        channel_id: None,
        guild_id: None,
        // The platform only emits this event when the bot is @-mentioned.
        mentioned_bot: true,
    })
}

fn parse_channel_message(data: &Value) -> Option<InboundMessage> {
    let content = non_empty(data.get("content"))?;
    let message_id = non_empty(data.get("id"))?;
    let channel_id = non_empty(data.get("channel_id"))?;
    let sender_id = non_empty(data.pointer("/author/id"))?;
    Some(InboundMessage {
        kind: ChatKind::Channel,
        sender_id,
        sender_name: non_empty(data.pointer("/author/username")),
        content,
        message_id,
        timestamp: parse_timestamp(data.get("timestamp")),
        group_id: None,
        channel_id: Some(channel_id),
        guild_id: non_empty(data.get("guild_id")),
        mentioned_bot: true,
    })
}

fn parse_direct_guild_message(data: &Value) -> Option<InboundMessage> {
    let content = non_empty(data.get("content"))?;
    let message_id = non_empty(data.get("id"))?;
    let sender_id = non_empty(data.pointer("/author/id"))?;
    Some(InboundMessage {
        kind: ChatKind::Direct,
        sender_id,
        sender_name: non_empty(data.pointer("/author/username")),
        content,
        message_id,
        timestamp: parse_timestamp(data.get("timestamp")),
        group_id: None,
        channel_id: None,
        guild_id: non_empty(data.get("guild_id")),
        mentioned_bot: false,
    })
}

/// Parse a raw event into a canonical message.
///
/// Unknown event types and malformed payloads both yield `None`; the caller
/// ignores them without logging an error.
pub fn parse_event(event_type: &str, data: &Value) -> Option<InboundMessage> {
    match event_type {
        "C2C_MESSAGE_CREATE" => parse_c2c_message(data),
        "GROUP_AT_MESSAGE_CREATE" => parse_group_message(data),
        "AT_MESSAGE_CREATE" => parse_channel_message(data),
        "DIRECT_MESSAGE_CREATE" => parse_direct_guild_message(data),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn c2c_message_parses_required_fields() {
        let data = json!({
            "content": "hello",
            "id": "m1",
            "timestamp": 1700000000000_i64,
            "author": { "user_openid": "u1", "username": "Ann" }
        });
        let msg = parse_event("C2C_MESSAGE_CREATE", &data).unwrap();
        assert_eq!(msg.kind, ChatKind::Direct);
        assert_eq!(msg.sender_id, "u1");
        assert_eq!(msg.sender_name.as_deref(), Some("Ann"));
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.message_id, "m1");
        assert_eq!(msg.timestamp, 1_700_000_000_000);
        assert!(!msg.mentioned_bot);
    }

    #[test]
    fn c2c_message_missing_sender_is_dropped() {
        let data = json!({ "content": "hi", "id": "m1", "author": {} });
        assert!(parse_event("C2C_MESSAGE_CREATE", &data).is_none());
    }

    #[test]
    fn c2c_message_blank_content_is_dropped() {
        let data = json!({
            "content": "   ",
            "id": "m1",
            "author": { "user_openid": "u1" }
        });
        assert!(parse_event("C2C_MESSAGE_CREATE", &data).is_none());
    }

    #[test]
    fn group_message_requires_group_openid() {
        let data = json!({
            "content": "hi",
            "id": "m2",
            "author": { "member_openid": "u2" }
        });
        assert!(parse_event("GROUP_AT_MESSAGE_CREATE", &data).is_none());

        let data = json!({
            "content": "hi",
            "id": "m2",
            "group_openid": "g1",
            "author": { "member_openid": "u2", "nickname": "Nick", "username": "User" }
        });
        let msg = parse_event("GROUP_AT_MESSAGE_CREATE", &data).unwrap();
        assert_eq!(msg.kind, ChatKind::Group);
        assert_eq!(msg.group_id.as_deref(), Some("g1"));
        // Nickname wins over username when both are present.
        assert_eq!(msg.sender_name.as_deref(), Some("Nick"));
        assert!(msg.mentioned_bot);
    }

    #[test]
    fn channel_message_requires_channel_id() {
        let data = json!({
            "content": "hi",
            "id": "m3",
            "guild_id": "guild9",
            "author": { "id": "u3" }
        });
        assert!(parse_event("AT_MESSAGE_CREATE", &data).is_none());

        let data = json!({
            "content": "hi",
            "id": "m3",
            "channel_id": "c1",
            "guild_id": "guild9",
            "author": { "id": "u3", "username": "Bo" }
        });
        let msg = parse_event("AT_MESSAGE_CREATE", &data).unwrap();
        assert_eq!(msg.kind, ChatKind::Channel);
        assert_eq!(msg.channel_id.as_deref(), Some("c1"));
        assert_eq!(msg.guild_id.as_deref(), Some("guild9"));
        assert!(msg.mentioned_bot);
    }

    #[test]
    fn direct_guild_message_needs_only_sender_and_content() {
        let data = json!({
            "content": "hi",
            "id": "m4",
            "guild_id": "guild9",
            "author": { "id": "u4" }
        });
        let msg = parse_event("DIRECT_MESSAGE_CREATE", &data).unwrap();
        assert_eq!(msg.kind, ChatKind::Direct);
        assert_eq!(msg.guild_id.as_deref(), Some("guild9"));
        assert!(!msg.mentioned_bot);
    }

    #[test]
    fn unknown_event_type_yields_none() {
        let data = json!({ "content": "hi", "id": "m5", "author": { "id": "u" } });
        assert!(parse_event("GUILD_CREATE", &data).is_none());
        assert!(parse_event("", &data).is_none());
    }

    #[test]
    fn malformed_payload_every_kind_yields_none() {
        for event_type in [
            "C2C_MESSAGE_CREATE",
            "GROUP_AT_MESSAGE_CREATE",
            "AT_MESSAGE_CREATE",
            "DIRECT_MESSAGE_CREATE",
        ] {
            assert!(parse_event(event_type, &json!({})).is_none(), "{event_type}");
            assert!(
                parse_event(event_type, &json!({ "content": "x" })).is_none(),
                "{event_type} missing id"
            );
            assert!(
                parse_event(event_type, &json!({ "id": "m", "author": {} })).is_none(),
                "{event_type} missing content"
            );
        }
    }

    #[test]
    fn string_timestamp_parses_rfc3339() {
        let data = json!({
            "content": "hi",
            "id": "m1",
            "timestamp": "2024-05-01T12:00:00+08:00",
            "author": { "user_openid": "u1" }
        });
        let msg = parse_event("C2C_MESSAGE_CREATE", &data).unwrap();
        assert_eq!(msg.timestamp, 1_714_536_000_000);
    }

    #[test]
    fn unparseable_timestamp_defaults_to_now() {
        let before = now_millis();
        let data = json!({
            "content": "hi",
            "id": "m1",
            "timestamp": "yesterday-ish",
            "author": { "user_openid": "u1" }
        });
        let msg = parse_event("C2C_MESSAGE_CREATE", &data).unwrap();
        assert!(msg.timestamp >= before);
    }
}
