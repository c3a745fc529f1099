//! Plain-text extraction and chunking for indexable files.

use serde::{Deserialize, Serialize};

/// One chunk of a larger text, with its byte bounds in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Chunk text.
    pub text: String,
    /// Start offset in the source.
    pub start: usize,
    /// End offset in the source.
    pub end: usize,
}

/// Split text into overlapping chunks.
///
/// Defaults used by the indexer are 600 characters with 120 overlap. Bounds
/// are clamped to char boundaries so multi-byte text never splits mid-glyph.
#[must_use]
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(TextChunk {
            text: chars[start..end].iter().collect(),
            start,
            end,
        });
        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap.min(chunk_size.saturating_sub(1)));
    }
    chunks
}

/// Extract plain text from uploaded bytes.
///
/// CSV rows are flattened into space-joined lines; markdown and plain text
/// pass through. Anything else falls back to a lossy UTF-8 decode.
#[must_use]
pub fn parse_text_from_bytes(data: &[u8], filename: &str) -> String {
    let text = String::from_utf8_lossy(data).into_owned();
    if filename.to_lowercase().ends_with(".csv") {
        return text
            .lines()
            .map(|line| {
                line.split(',')
                    .map(str::trim)
                    .filter(|cell| !cell.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_overlap_and_cover_everything() {
        let text = "a".repeat(1500);
        let chunks = chunk_text(&text, 600, 120);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 600);
        assert_eq!(chunks[1].start, 480);
        assert_eq!(chunks.last().unwrap().end, 1500);
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("짧은 문서", 600, 120);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "짧은 문서");
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 600, 120).is_empty());
    }

    #[test]
    fn multibyte_text_never_splits_mid_char() {
        let text = "한".repeat(700);
        let chunks = chunk_text(&text, 600, 120);
        assert!(chunks.iter().all(|c| c.text.chars().all(|ch| ch == '한')));
    }

    #[test]
    fn csv_rows_flatten_to_lines() {
        let csv = b"title,price\nQLED TV, 1200\n";
        let parsed = parse_text_from_bytes(csv, "products.csv");
        assert_eq!(parsed, "title price\nQLED TV 1200");
    }

    #[test]
    fn plain_text_passes_through() {
        let parsed = parse_text_from_bytes("hello".as_bytes(), "notes.txt");
        assert_eq!(parsed, "hello");
    }
}
