//! Text chunking and fenced code block extraction.

/// Breaks are only taken past this fraction of the chunk size, so a boundary
/// near the window start never produces a tiny chunk.
const MIN_BREAK_RATIO: (usize, usize) = (3, 10);

/// Longest summary we derive from page content.
const SUMMARY_MAX_CHARS: usize = 400;

/// Split text into chunks of at most `chunk_size` bytes.
///
/// Each window prefers to end just before a code fence, then at a paragraph
/// break, then after a sentence. Chunks are trimmed; empty ones are dropped.
pub fn smart_chunk(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let min_break = chunk_size * MIN_BREAK_RATIO.0 / MIN_BREAK_RATIO.1;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = floor_char_boundary(text, start + chunk_size);
        if end >= text.len() {
            push_trimmed(&mut chunks, &text[start..]);
            break;
        }
        if end == start {
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }

        let window = &text[start..end];
        if let Some(pos) = window.rfind("```").filter(|&p| p > min_break) {
            end = start + pos;
        } else if let Some(pos) = window.rfind("\n\n").filter(|&p| p > min_break) {
            end = start + pos;
        } else if let Some(pos) = window.rfind(". ").filter(|&p| p > min_break) {
            end = start + pos + 1;
        }

        push_trimmed(&mut chunks, &text[start..end]);
        start = end;
    }

    chunks
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        chunks.push(piece.to_string());
    }
}

pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// A fenced code block found in markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub code: String,
}

/// Extract fenced (```) code blocks whose trimmed body is at least
/// `min_length` bytes. An unterminated fence is ignored.
pub fn extract_code_blocks(markdown: &str, min_length: usize) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(Option<String>, Vec<&str>)> = None;

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        match open.take() {
            None => {
                if let Some(info) = trimmed.strip_prefix("```") {
                    let language = info
                        .split_whitespace()
                        .next()
                        .map(|l| l.trim_matches('`').to_ascii_lowercase())
                        .filter(|l| !l.is_empty());
                    open = Some((language, Vec::new()));
                }
            }
            Some((language, mut lines)) => {
                if trimmed.starts_with("```") {
                    let code = lines.join("\n");
                    if code.trim().len() >= min_length {
                        blocks.push(CodeBlock {
                            language,
                            code: code.trim_end().to_string(),
                        });
                    }
                } else {
                    lines.push(line);
                    open = Some((language, lines));
                }
            }
        }
    }

    blocks
}

/// Short extractive summary: the first prose paragraph of the first page
/// that has one, prefixed with the source name.
pub fn extractive_summary<'a>(
    display_name: &str,
    documents: impl IntoIterator<Item = &'a str>,
) -> String {
    let paragraph = documents.into_iter().find_map(|doc| {
        doc.split("\n\n")
            .map(str::trim)
            .find(|p| {
                !p.is_empty()
                    && !p.starts_with('#')
                    && !p.starts_with("```")
                    && !p.starts_with('-')
                    && !p.starts_with('*')
            })
            .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
    });

    match paragraph {
        Some(p) => {
            let text = format!("{display_name}: {p}");
            if text.chars().count() > SUMMARY_MAX_CHARS {
                let cut: String = text.chars().take(SUMMARY_MAX_CHARS).collect();
                format!("{}...", cut.trim_end())
            } else {
                text
            }
        }
        None => format!("Content from {display_name}"),
    }
}
