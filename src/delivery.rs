//! Outbound delivery: one reply payload in, zero or more platform sends out.
//!
//! Order guarantee: text chunks first, in source order, then media
//! references in discovery order. Each send is independent — a failure is
//! logged and (for media) replaced by a text fallback, never propagated,
//! and never cancels later sends.

use crate::config::{ChunkMode, TableMode};
use crate::media::{extract_media, ExtractOptions, MediaReference};
use crate::outbound::Transport;
use crate::reply::{ReplyEvent, ReplyKind, ReplyPayload};
use crate::text::{chunk_text, convert_markdown_tables};

/// Delivery knobs resolved from channel config.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryOptions {
    pub chunk_limit: usize,
    pub chunk_mode: ChunkMode,
    pub table_mode: TableMode,
    /// Discard non-final payloads of a streamed reply.
    pub reply_final_only: bool,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            chunk_limit: 1500,
            chunk_mode: ChunkMode::Markdown,
            table_mode: TableMode::Bullets,
            reply_final_only: false,
        }
    }
}

/// Deliver a streamed reply sequence, applying the `reply_final_only`
/// filter before any per-payload work.
pub async fn deliver_events(
    transport: &dyn Transport,
    to: &str,
    reply_to: Option<&str>,
    events: &[ReplyEvent],
    opts: &DeliveryOptions,
) {
    for event in events {
        if opts.reply_final_only && event.kind != ReplyKind::Final {
            continue;
        }
        deliver_payload(transport, to, reply_to, &event.payload, opts).await;
    }
}

/// Deliver a single payload: extract media, convert tables, chunk, send.
pub async fn deliver_payload(
    transport: &dyn Transport,
    to: &str,
    reply_to: Option<&str>,
    payload: &ReplyPayload,
    opts: &DeliveryOptions,
) {
    let raw_text = payload.text.as_deref().unwrap_or("");
    let media_lines = extract_media(raw_text, &ExtractOptions::media_lines());
    let inline = extract_media(&media_lines.text, &ExtractOptions::inline_media());

    // Structured fields first, then media-line matches, then inline matches,
    // deduplicated by trimmed source across all three.
    let mut queue: Vec<String> = Vec::new();
    let mut push_media = |value: &str| {
        let next = value.trim();
        if next.is_empty() || queue.iter().any(|seen| seen == next) {
            return;
        }
        queue.push(next.to_string());
    };
    for source in payload.media_sources() {
        push_media(source);
    }
    for reference in media_lines.refs.iter().chain(inline.refs.iter()) {
        push_media(send_value(reference));
    }

    let trimmed = inline.text.trim();
    if !trimmed.is_empty() {
        let converted = convert_markdown_tables(trimmed, opts.table_mode);
        for chunk in chunk_text(&converted, opts.chunk_limit, opts.chunk_mode) {
            if let Err(err) = transport.send_text(to, &chunk, reply_to).await {
                tracing::error!(channel = transport.name(), "sendText failed: {err:#}");
            }
        }
    }

    for media_url in &queue {
        if let Err(err) = transport.send_media(to, media_url, reply_to).await {
            tracing::error!(
                channel = transport.name(),
                media = %media_url,
                "sendMedia failed: {err:#}"
            );
            // A media failure must not silently drop content.
            let fallback = format!("📎 {media_url}");
            if let Err(err) = transport.send_text(to, &fallback, reply_to).await {
                tracing::error!(channel = transport.name(), "sendText fallback failed: {err:#}");
            }
        }
    }
}

/// Media lines deliver the local path when resolvable, the raw source
/// otherwise; inline references behave the same way.
fn send_value(reference: &MediaReference) -> &str {
    reference.send_target()
}
