//! Reply-text shaping: chunking and markdown-table conversion.
//!
//! Chat platforms bound message length, and most render pipe tables poorly.
//! Delivery converts tables first, then splits the result into size-bounded
//! chunks sent in order.

use crate::config::{ChunkMode, TableMode};

/// Split `text` into chunks of at most `limit` characters, preferring
/// newline then space break points, falling back to a hard cut.
pub fn chunk_plain_text(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > limit {
        let window: String = rest.chars().take(limit).collect();
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&idx| idx > 0)
            .unwrap_or(window.len());
        let (head, tail) = rest.split_at(cut);
        let trimmed = head.trim_end();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        rest = tail.trim_start_matches(['\n', ' ']);
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Markdown-aware chunking: accumulate whole paragraphs (blank-line
/// separated blocks, code fences kept intact) up to `limit`; oversized
/// blocks degrade to plain-length splitting.
pub fn chunk_markdown_text(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let blocks = split_markdown_blocks(text);
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for block in blocks {
        let joined_len = if current.is_empty() {
            block.chars().count()
        } else {
            current.chars().count() + 2 + block.chars().count()
        };
        if joined_len <= limit {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&block);
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if block.chars().count() <= limit {
            current = block;
        } else {
            chunks.extend(chunk_plain_text(&block, limit));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Blank-line separated blocks; a fenced code block counts as one block
/// regardless of blank lines inside it.
fn split_markdown_blocks(text: &str) -> Vec<String> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            current.push(line);
            continue;
        }
        if line.trim().is_empty() && !in_fence {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

/// Chunk with the configured strategy.
pub fn chunk_text(text: &str, limit: usize, mode: ChunkMode) -> Vec<String> {
    match mode {
        ChunkMode::Markdown => chunk_markdown_text(text, limit),
        ChunkMode::Plain => chunk_plain_text(text, limit),
    }
}

/// Rewrite markdown pipe tables as bulleted lists (one bullet per data row,
/// `header: value` pairs inline). `TableMode::Keep` passes text through.
pub fn convert_markdown_tables(text: &str, mode: TableMode) -> String {
    if mode == TableMode::Keep {
        return text.to_string();
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        // A table is a header row, a separator row, then data rows.
        if is_table_row(lines[i]) && i + 1 < lines.len() && is_separator_row(lines[i + 1]) {
            let headers = split_table_row(lines[i]);
            i += 2;
            while i < lines.len() && is_table_row(lines[i]) {
                let cells = split_table_row(lines[i]);
                let pairs: Vec<String> = headers
                    .iter()
                    .zip(cells.iter())
                    .filter(|(_, cell)| !cell.is_empty())
                    .map(|(header, cell)| {
                        if header.is_empty() {
                            cell.clone()
                        } else {
                            format!("{header}: {cell}")
                        }
                    })
                    .collect();
                if !pairs.is_empty() {
                    out.push(format!("- {}", pairs.join(", ")));
                }
                i += 1;
            }
            continue;
        }
        out.push(lines[i].to_string());
        i += 1;
    }
    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.len() > 1 && trimmed.contains('|')
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') {
        return false;
    }
    trimmed
        .chars()
        .all(|c| matches!(c, '|' | '-' | ':' | ' '))
        && trimmed.contains('-')
}

fn split_table_row(line: &str) -> Vec<String> {
    line.trim()
        .trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_plain_text("hello", 1500), vec!["hello"]);
        assert_eq!(chunk_markdown_text("hello", 1500), vec!["hello"]);
    }

    #[test]
    fn plain_chunks_respect_limit_and_order() {
        let text = "aaaa bbbb cccc dddd eeee";
        let chunks = chunk_plain_text(text, 10);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 10, "{chunk:?}");
        }
        let rejoined = chunks.join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn plain_chunk_prefers_newline_break() {
        let text = "line one\nline two that continues";
        let chunks = chunk_plain_text(text, 12);
        assert_eq!(chunks[0], "line one");
    }

    #[test]
    fn plain_chunk_hard_cuts_unbroken_text() {
        let text = "x".repeat(25);
        let chunks = chunk_plain_text(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn plain_chunk_handles_multibyte_content() {
        let text = "你好世界".repeat(10);
        let chunks = chunk_plain_text(&text, 7);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 7);
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn markdown_chunks_keep_paragraphs_together() {
        let text = "first paragraph\n\nsecond paragraph\n\nthird one";
        let chunks = chunk_markdown_text(text, 36);
        assert_eq!(chunks[0], "first paragraph\n\nsecond paragraph");
        assert_eq!(chunks[1], "third one");
    }

    #[test]
    fn markdown_chunks_keep_code_fences_intact() {
        let code = "```\nlet a = 1;\n\nlet b = 2;\n```";
        let text = format!("intro\n\n{code}");
        let chunks = chunk_markdown_text(&text, 32);
        assert!(chunks.iter().any(|c| c.contains("let a = 1;") && c.contains("let b = 2;")));
    }

    #[test]
    fn table_converted_to_bullets() {
        let text = "| name | age |\n|---|---|\n| Ann | 30 |\n| Bo | 41 |";
        let converted = convert_markdown_tables(text, TableMode::Bullets);
        assert_eq!(converted, "- name: Ann, age: 30\n- name: Bo, age: 41");
    }

    #[test]
    fn table_keep_mode_passes_through() {
        let text = "| a | b |\n|---|---|\n| 1 | 2 |";
        assert_eq!(convert_markdown_tables(text, TableMode::Keep), text);
    }

    #[test]
    fn table_surrounded_by_prose_preserved() {
        let text = "before\n| a | b |\n|:--|--:|\n| 1 | 2 |\nafter";
        let converted = convert_markdown_tables(text, TableMode::Bullets);
        assert_eq!(converted, "before\n- a: 1, b: 2\nafter");
    }

    #[test]
    fn non_table_pipes_untouched() {
        let text = "a | b is not a table";
        assert_eq!(convert_markdown_tables(text, TableMode::Bullets), text);
    }

    #[test]
    fn chunk_text_dispatches_on_mode() {
        let text = "p1\n\np2";
        assert_eq!(chunk_text(text, 100, ChunkMode::Markdown), vec![text.to_string()]);
        assert_eq!(chunk_text(text, 100, ChunkMode::Plain), vec![text.to_string()]);
    }
}
