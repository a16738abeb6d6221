//! QQ-bot inbound dispatch: event payload in, outbound sends out.
//!
//! The dispatcher is deliberately total: a message that fails any gate is
//! logged and dropped, collaborator errors are logged and contained, and the
//! caller never sees a failure for a single bad event.

use crate::config::Config;
use crate::delivery::{deliver_events, DeliveryOptions};
use crate::inbound::parse_event;
use crate::outbound::Transport;
use crate::policy::should_handle;
use crate::reply::{AgentRuntime, EnvelopeParams, LastRouteUpdate, Peer};
use crate::routing::{
    build_context, resolve_chat_target, resolve_envelope_from, ChatType, PeerKind, PROVIDER_QQBOT,
};

/// Handle one QQ-bot gateway event end to end.
pub async fn handle_qqbot_dispatch(
    event_type: &str,
    event_data: &serde_json::Value,
    config: &Config,
    account_id: &str,
    runtime: &AgentRuntime,
    transport: &dyn Transport,
) {
    let Some(mut message) = parse_event(event_type, event_data) else {
        tracing::debug!(event_type, "ignoring unhandled event");
        return;
    };

    let Some(cfg) = config.channels.qqbot.as_ref() else {
        tracing::warn!("qqbot event received but channel is not configured");
        return;
    };
    if !cfg.enabled {
        tracing::info!("qqbot channel disabled, dropping event");
        return;
    }

    if !should_handle(&message, cfg) {
        return;
    }

    message.content = message.content.trim().to_string();
    if message.content.is_empty() {
        tracing::debug!(message_id = %message.message_id, "dropping empty message");
        return;
    }

    let target = resolve_chat_target(&message);
    let peer = Peer { kind: target.peer_kind, id: target.peer_id.clone() };
    let route = runtime.routing.resolve(PROVIDER_QQBOT, account_id, &peer);

    let body = runtime.envelope.as_ref().map(|envelope| {
        let previous_timestamp = runtime
            .session
            .as_ref()
            .and_then(|session| session.last_updated_at(&route.session_key));
        let from = resolve_envelope_from(&message);
        let sender_label = message
            .sender_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&message.sender_id);
        envelope.format_inbound(&EnvelopeParams {
            channel: PROVIDER_QQBOT,
            from: &from,
            body: &message.content,
            timestamp: message.timestamp,
            previous_timestamp,
            chat_type: match target.peer_kind {
                PeerKind::Dm => "direct",
                PeerKind::Group => "group",
            },
            sender_label,
        })
    });

    let mut ctx = build_context(&message, &route, account_id, body);

    if let Some(prompt) = &runtime.prompt {
        ctx.augment_body_for_agent(|base| prompt.augment(base));
    }

    if let Some(session) = &runtime.session {
        // Only direct messages move the "reply here by default" pointer;
        // group traffic must not steal the main session's route.
        let last_route = (ctx.chat_type == ChatType::Direct).then(|| LastRouteUpdate {
            session_key: route
                .main_session_key
                .clone()
                .unwrap_or_else(|| route.session_key.clone()),
            channel: PROVIDER_QQBOT.to_string(),
            to: ctx.originating_to.clone(),
            account_id: ctx.account_id.clone(),
        });
        if let Err(err) = session.record_inbound(&route.session_key, &ctx, last_route.as_ref()) {
            tracing::warn!(session = %route.session_key, "session record failed: {err:#}");
        }
    }

    let events = match runtime.engine.run(&ctx).await {
        Ok(events) => events,
        Err(err) => {
            tracing::error!(session = %route.session_key, "reply engine failed: {err:#}");
            return;
        }
    };

    let opts = DeliveryOptions {
        chunk_limit: cfg.text_chunk_limit,
        chunk_mode: cfg.chunk_mode,
        table_mode: cfg.table_mode,
        reply_final_only: cfg.reply_final_only,
    };
    let reply_to = Some(message.message_id.as_str()).filter(|id| !id.is_empty());
    deliver_events(transport, &ctx.to, reply_to, &events, &opts).await;
}
