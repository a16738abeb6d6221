//! Media reference extraction from free-form reply text.
//!
//! Reply engines embed media as markdown images, HTML `<img>` tags, bare
//! local paths, markdown links to media files, or dedicated media lines
//! (`MEDIA: <ref>` / `attachment://<ref>`). Extraction separates those
//! references from the displayable text so delivery can send them through
//! the platform's media path.
//!
//! Two passes run at different pipeline stages with different option sets:
//! a media-line scan first, then an embedded markdown/bare-path scan over
//! the remaining text.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// A media pointer found in text. `source` is the original matched token;
/// `local_path` is the normalized filesystem path for local references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub source: String,
    pub is_local: bool,
    pub local_path: Option<String>,
}

impl MediaReference {
    /// The value delivery should hand to a transport: local path when the
    /// reference is local, original source otherwise.
    pub fn send_target(&self) -> &str {
        self.local_path.as_deref().unwrap_or(&self.source)
    }
}

/// Which syntaxes a pass recognizes and how matches are treated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    pub remove_from_text: bool,
    /// Drop local references whose file does not exist (the matched span is
    /// still removed from the text).
    pub check_exists: bool,
    pub parse_media_lines: bool,
    pub parse_markdown_images: bool,
    pub parse_html_images: bool,
    pub parse_bare_paths: bool,
    pub parse_markdown_links: bool,
}

impl ExtractOptions {
    /// First pipeline pass: dedicated media lines only.
    pub fn media_lines() -> Self {
        Self {
            remove_from_text: true,
            check_exists: true,
            parse_media_lines: true,
            ..Self::default()
        }
    }

    /// Second pipeline pass: markdown images, bare paths and media links
    /// embedded in prose.
    pub fn inline_media() -> Self {
        Self {
            remove_from_text: true,
            check_exists: true,
            parse_markdown_images: true,
            parse_bare_paths: true,
            parse_markdown_links: true,
            ..Self::default()
        }
    }
}

/// Result of one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct MediaExtraction {
    /// Remaining displayable text, whitespace-trimmed.
    pub text: String,
    /// References in discovery order, deduplicated by trimmed source.
    pub refs: Vec<MediaReference>,
}

fn media_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*(?:MEDIA:[ \t]*|attachment://)(\S[^\r\n]*?)[ \t]*$").expect("regex")
    })
}

fn markdown_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").expect("regex"))
}

fn markdown_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]\(([^)]+)\)").expect("regex"))
}

fn html_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*\bsrc\s*=\s*(?:"([^"]+)"|'([^']+)'|([^\s>]+))[^>]*>"#)
            .expect("regex")
    })
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S+").expect("regex"))
}

fn bare_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Absolute paths with a known media extension only, so ordinary prose
    // mentioning /etc/hosts is left alone. Anchored: applied per whitespace
    // token, never to a substring.
    RE.get_or_init(|| {
        Regex::new(r"(?i)^/[^\s]+\.(?:png|jpe?g|gif|webp|bmp|mp4|mov|webm|mp3|wav|ogg|opus)$")
            .expect("regex")
    })
}

fn media_extension_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\.(?:png|jpe?g|gif|webp|bmp|mp4|mov|webm|mp3|wav|ogg|opus|pdf)(?:\?|#|$)")
            .expect("regex")
    })
}

pub fn is_http_url(value: &str) -> bool {
    let lower = value.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Strip a markdown title suffix (`url "title"`) from a source token.
pub fn strip_title_from_url(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.find(' ') {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    }
}

/// Strip the scheme prefixes local references may carry.
pub fn normalize_local_path(raw: &str) -> String {
    let trimmed = raw.trim();
    for prefix in ["file://", "attachment://", "MEDIA:"] {
        if trimmed.len() >= prefix.len() && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return trimmed[prefix.len()..].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Why a media source could not be turned into bytes. The offending
/// reference travels as plain data (`url`/`path`), not as a chained cause.
#[derive(Debug, thiserror::Error)]
pub enum MediaSourceError {
    #[error("failed to fetch remote media '{url}': {reason}")]
    RemoteFetchFailed { url: String, reason: String },

    #[error("remote media fetch returned status {status} for '{url}'")]
    RemoteFetchStatus { url: String, status: u16 },

    #[error("failed to read local media '{path}': {reason}")]
    LocalReadFailed { path: String, reason: String },
}

/// Fetch a URL or read a local path, returning the bytes plus a filename
/// guess for upload forms.
pub async fn load_media_bytes(
    client: &reqwest::Client,
    source: &str,
) -> Result<(Vec<u8>, String), MediaSourceError> {
    if is_http_url(source) {
        let resp = client.get(source).send().await.map_err(|err| {
            MediaSourceError::RemoteFetchFailed {
                url: source.to_string(),
                reason: err.to_string(),
            }
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MediaSourceError::RemoteFetchStatus {
                url: source.to_string(),
                status: status.as_u16(),
            });
        }
        let name = source
            .split(['?', '#'])
            .next()
            .and_then(|stem| stem.rsplit('/').next())
            .filter(|n| !n.is_empty())
            .unwrap_or("media.bin")
            .to_string();
        let bytes = resp.bytes().await.map_err(|err| {
            MediaSourceError::RemoteFetchFailed {
                url: source.to_string(),
                reason: err.to_string(),
            }
        })?;
        return Ok((bytes.to_vec(), name));
    }

    let path = normalize_local_path(source);
    let bytes = tokio::fs::read(&path).await.map_err(|err| {
        MediaSourceError::LocalReadFailed { path: path.clone(), reason: err.to_string() }
    })?;
    let name = std::path::Path::new(&path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("media.bin")
        .to_string();
    Ok((bytes, name))
}

fn make_reference(source: &str) -> MediaReference {
    let cleaned = strip_title_from_url(source);
    if is_http_url(cleaned) {
        MediaReference {
            source: cleaned.to_string(),
            is_local: false,
            local_path: None,
        }
    } else {
        MediaReference {
            source: cleaned.to_string(),
            is_local: true,
            local_path: Some(normalize_local_path(cleaned)),
        }
    }
}

/// A candidate span: byte range of the matched syntax plus the captured
/// source token.
struct MatchSpan {
    start: usize,
    end: usize,
    source: String,
}

fn collect_spans(text: &str, opts: &ExtractOptions) -> Vec<MatchSpan> {
    let mut spans: Vec<MatchSpan> = Vec::new();

    if opts.parse_media_lines {
        for caps in media_line_re().captures_iter(text) {
            let whole = caps.get(0).expect("match");
            let inner = caps.get(1).expect("capture");
            // attachment:// lines keep the scheme as part of the source.
            let matched = whole.as_str().trim_start();
            let source = if matched.to_ascii_lowercase().starts_with("attachment://") {
                format!("attachment://{}", inner.as_str())
            } else {
                inner.as_str().to_string()
            };
            spans.push(MatchSpan { start: whole.start(), end: whole.end(), source });
        }
    }

    if opts.parse_markdown_images {
        for caps in markdown_image_re().captures_iter(text) {
            let whole = caps.get(0).expect("match");
            let src = caps.get(1).expect("capture");
            spans.push(MatchSpan {
                start: whole.start(),
                end: whole.end(),
                source: src.as_str().to_string(),
            });
        }
    }

    if opts.parse_html_images {
        for caps in html_image_re().captures_iter(text) {
            let whole = caps.get(0).expect("match");
            let src = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");
            if !src.is_empty() {
                spans.push(MatchSpan {
                    start: whole.start(),
                    end: whole.end(),
                    source: src.to_string(),
                });
            }
        }
    }

    if opts.parse_markdown_links {
        for caps in markdown_link_re().captures_iter(text) {
            let whole = caps.get(0).expect("match");
            // Skip image syntax; it is the markdown-image matcher's job.
            if whole.start() > 0 && text.as_bytes()[whole.start() - 1] == b'!' {
                continue;
            }
            let src = strip_title_from_url(caps.get(1).expect("capture").as_str());
            // Only links whose target looks like a media file count; other
            // links are ordinary prose.
            if media_extension_re().is_match(src) {
                spans.push(MatchSpan {
                    start: whole.start(),
                    end: whole.end(),
                    source: src.to_string(),
                });
            }
        }
    }

    if opts.parse_bare_paths {
        // Token-wise scan so adjacent paths separated by one space are all
        // seen; trailing sentence punctuation is not part of the path.
        for token in token_re().find_iter(text) {
            let trimmed = token.as_str().trim_end_matches(['.', ',', ';', '!', '?']);
            if trimmed.is_empty() || !bare_path_re().is_match(trimmed) {
                continue;
            }
            spans.push(MatchSpan {
                start: token.start(),
                end: token.start() + trimmed.len(),
                source: trimmed.to_string(),
            });
        }
    }

    spans.sort_by_key(|span| (span.start, span.end));
    // Drop spans nested in or overlapping an earlier match.
    let mut filtered: Vec<MatchSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if filtered.last().is_none_or(|prev| span.start >= prev.end) {
            filtered.push(span);
        }
    }
    filtered
}

/// Run one extraction pass over `text`.
///
/// Matched spans are removed when `remove_from_text` is set, including spans
/// whose local file failed the existence check — a broken reference is never
/// re-inserted into the published text.
pub fn extract_media(text: &str, opts: &ExtractOptions) -> MediaExtraction {
    let spans = collect_spans(text, opts);
    if spans.is_empty() {
        return MediaExtraction {
            text: text.trim().to_string(),
            refs: Vec::new(),
        };
    }

    let mut refs: Vec<MediaReference> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let mut remainder = String::with_capacity(text.len());
    let mut cursor = 0usize;

    for span in &spans {
        if opts.remove_from_text {
            remainder.push_str(&text[cursor..span.start]);
            cursor = span.end;
        }

        let reference = make_reference(&span.source);
        if reference.source.is_empty() {
            continue;
        }
        if opts.check_exists && reference.is_local {
            let path = reference.local_path.as_deref().unwrap_or(&reference.source);
            if !Path::new(path).exists() {
                tracing::warn!(path = %path, "media: local file not found, dropping reference");
                continue;
            }
        }
        let key = reference.source.trim().to_string();
        if seen.iter().any(|s| s == &key) {
            continue;
        }
        seen.push(key);
        refs.push(reference);
    }

    let text = if opts.remove_from_text {
        remainder.push_str(&text[cursor..]);
        remainder.trim().to_string()
    } else {
        text.trim().to_string()
    };

    MediaExtraction { text, refs }
}
