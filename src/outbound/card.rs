//! Feishu interactive-card construction from markdown text.
//!
//! Markdown containing image references becomes an ordered sequence of
//! markdown and image elements. Three image syntaxes compete at each scan
//! position: a markdown image wrapped in a link, a bare markdown image, and
//! an HTML `<img>` tag. The earliest match wins; on an exact position tie
//! the more specific pattern wins (linked > plain > HTML), since linked
//! notation textually contains plain-image notation.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::media::strip_title_from_url;

/// Uploads one image and returns the platform `image_key`. Implemented by
/// the Feishu transport; injected so card construction is testable offline.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(&self, source: &str) -> anyhow::Result<String>;
}

fn linked_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[!\[([^\]]*)\]\(([^)]+)\)\]\(([^)]+)\)").expect("regex"))
}

fn plain_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").expect("regex"))
}

fn html_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*\bsrc\s*=\s*(?:"([^"]+)"|'([^']+)'|([^\s>]+))[^>]*>"#)
            .expect("regex")
    })
}

fn html_alt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\balt\s*=\s*(?:"([^"]+)"|'([^']+)'|([^\s>]+))"#).expect("regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageMatch {
    start: usize,
    end: usize,
    alt: String,
    src: String,
}

/// Find the earliest image reference at or after `from`.
fn next_image_match(text: &str, from: usize) -> Option<ImageMatch> {
    let hay = &text[from..];

    let linked = linked_image_re().captures(hay);
    let plain = plain_image_re().captures(hay);
    let html = html_image_re().captures(hay);

    // Ordered by priority; stable min-by keeps the earlier entry on ties.
    let candidates = [linked.as_ref(), plain.as_ref(), html.as_ref()];
    let winner_idx = candidates
        .iter()
        .enumerate()
        .filter_map(|(i, caps)| caps.map(|c| (i, c.get(0).expect("match").start())))
        .min_by_key(|&(_, start)| start)
        .map(|(i, _)| i)?;

    let caps = candidates[winner_idx]?;
    let whole = caps.get(0).expect("match");
    let (alt, src) = match winner_idx {
        // Linked and plain images share capture layout: alt then src.
        0 | 1 => (
            caps.get(1).map(|m| m.as_str()).unwrap_or("").to_string(),
            caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string(),
        ),
        _ => {
            let src = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or("")
                .to_string();
            let alt = html_alt_re()
                .captures(whole.as_str())
                .and_then(|a| a.get(1).or_else(|| a.get(2)).or_else(|| a.get(3)))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (alt, src)
        }
    };

    Some(ImageMatch {
        start: from + whole.start(),
        end: from + whole.end(),
        alt,
        src,
    })
}

fn markdown_element(content: &str) -> Value {
    json!({ "tag": "markdown", "content": content })
}

fn image_element(image_key: &str, alt: &str) -> Value {
    let alt = if alt.is_empty() { "image" } else { alt };
    json!({
        "tag": "img",
        "img_key": image_key,
        "alt": { "tag": "plain_text", "content": alt }
    })
}

fn card_from_elements(elements: Vec<Value>) -> Value {
    json!({
        "config": { "wide_screen_mode": true },
        "elements": elements,
    })
}

/// Wrap plain markdown text in a single-element card.
pub fn build_markdown_card(text: &str) -> Value {
    card_from_elements(vec![markdown_element(text)])
}

/// Build a card replacing every image reference with an uploaded image
/// element. Uploads are independent per occurrence — repeated references
/// re-upload rather than sharing a key. Any fetch/read/upload failure
/// degrades that reference to a markdown link instead of aborting the card.
pub async fn build_markdown_card_with_images(
    text: &str,
    uploader: &dyn ImageUploader,
) -> Value {
    let mut elements: Vec<Value> = Vec::new();
    let mut cursor = 0usize;

    while let Some(found) = next_image_match(text, cursor) {
        let before = &text[cursor..found.start];
        if !before.trim().is_empty() {
            elements.push(markdown_element(before));
        }

        let src = strip_title_from_url(&found.src);
        match uploader.upload(src).await {
            Ok(image_key) => elements.push(image_element(&image_key, &found.alt)),
            Err(err) => {
                tracing::warn!(src = %src, "card image upload failed, degrading to link: {err:#}");
                let fallback = if found.alt.is_empty() {
                    src.to_string()
                } else {
                    format!("[{}]({src})", found.alt)
                };
                elements.push(markdown_element(&fallback));
            }
        }

        cursor = found.end;
    }

    let remaining = &text[cursor..];
    if !remaining.trim().is_empty() {
        elements.push(markdown_element(remaining));
    }

    if elements.is_empty() {
        return build_markdown_card(text);
    }

    card_from_elements(elements)
}
