use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// One retrievable fragment of a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub content: String,
    pub source: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Chunks `text` and tags every piece with its position inside `source`.
pub fn split_document(
    text: &str,
    source: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<DocumentChunk>> {
    let pieces = chunk_text(text, chunk_size, overlap)?;
    let total = pieces.len();
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, content)| DocumentChunk {
            content,
            source: source.to_string(),
            chunk_index,
            total_chunks: total,
        })
        .collect())
}

pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    let chars: Vec<char> = normalize_whitespace(text).chars().collect();
    let chunks = chunk_windows(&chars, chunk_size, overlap)?
        .into_iter()
        .filter_map(|(start, end)| {
            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect();
    Ok(chunks)
}

/// Collapses every whitespace run to a single space and trims both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Char ranges `[start, end)` of each window over already normalized text.
///
/// A window that stops short of the end of the text is pulled back to just
/// after the last `.` or onto the last space, provided that boundary lies in
/// the second half of the window.
pub(crate) fn chunk_windows(
    chars: &[char],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<(usize, usize)>> {
    if chunk_size == 0 {
        return Err(RagError::invalid("chunk size must be greater than zero"));
    }
    if overlap >= chunk_size {
        return Err(RagError::invalid(format!(
            "chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
        )));
    }

    let len = chars.len();
    let half = chunk_size / 2;
    let mut windows = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = start + chunk_size;
        if end >= len {
            windows.push((start, len));
            break;
        }

        let last_period = chars[start..end].iter().rposition(|&c| c == '.');
        let last_space = chars[start..=end].iter().rposition(|&c| c == ' ');
        end = match (last_period, last_space) {
            (Some(p), _) if p > half => start + p + 1,
            (_, Some(s)) if s > half => start + s,
            _ => end,
        };
        windows.push((start, end));

        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(count: usize) -> String {
        (0..count)
            .map(|i| format!("w{i:04}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("  Hello   world.\n\nSecond line ", 500, 50).unwrap();
        assert_eq!(chunks, vec!["Hello world. Second line".to_string()]);
    }

    #[test]
    fn text_of_exactly_chunk_size_is_a_single_chunk() {
        let text = "a".repeat(500);
        let chunks = chunk_text(&text, 500, 50).unwrap();
        assert_eq!(chunks, vec![text]);

        let chunks = chunk_text(&"a".repeat(501), 500, 50).unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text(" \n\t ", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn prefers_sentence_end_past_the_midpoint() {
        let text = format!("{}. {}", "a".repeat(70), "b ".repeat(40));
        let chunks = chunk_text(&text, 100, 10).unwrap();
        assert!(chunks[0].ends_with('.'));
        assert_eq!(chunks[0].chars().count(), 71);
    }

    #[test]
    fn ignores_sentence_end_before_the_midpoint() {
        // period at 10 is too early, the space at 96 wins
        let text = format!("{}. {} {}", "a".repeat(10), "b".repeat(84), "c".repeat(50));
        let chunks = chunk_text(&text, 100, 10).unwrap();
        assert!(chunks[0].ends_with('b'));
    }

    #[test]
    fn falls_back_to_raw_boundary_without_separators() {
        let text = "x".repeat(250);
        let chunks = chunk_text(&text, 100, 20).unwrap();
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[1].len(), 100);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        assert!(chunk_text("abc", 10, 10).unwrap_err().is_invalid_input());
        assert!(chunk_text("abc", 0, 0).unwrap_err().is_invalid_input());
    }

    #[test]
    fn twelve_hundred_chars_make_three_overlapping_chunks() {
        let text = format!("{}.", numbered_words(200));
        assert_eq!(text.len(), 1200);

        let chunks = chunk_text(&text, 500, 50).unwrap();
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 500);
        }
        for pair in chunks.windows(2) {
            let shared = (1..=pair[1].len().min(pair[0].len()))
                .rev()
                .find(|&k| pair[0].ends_with(&pair[1][..k]))
                .unwrap_or(0);
            assert!(shared >= 40, "only {shared} chars shared");
        }
    }

    #[test]
    fn windows_cover_every_non_space_char() {
        let text = format!(
            "{} Lorem ipsum. Dolor sit amet, consectetur. {}",
            numbered_words(150),
            "x".repeat(300)
        );
        let chars: Vec<char> = normalize_whitespace(&text).chars().collect();
        for (size, overlap) in [(50, 0), (50, 49), (64, 10), (100, 60), (500, 50), (7, 3)] {
            let windows = chunk_windows(&chars, size, overlap).unwrap();
            for (i, c) in chars.iter().enumerate() {
                if *c == ' ' {
                    continue;
                }
                assert!(
                    windows.iter().any(|&(s, e)| s <= i && i < e),
                    "char {i} uncovered for size={size} overlap={overlap}"
                );
            }
        }
    }

    #[test]
    fn early_cut_with_large_overlap_keeps_the_rest_of_the_text() {
        // the space at 51 pulls the first window back below the overlap
        let text = format!("{} {}", "a".repeat(51), "b".repeat(200));
        let chunks = chunk_text(&text, 100, 90).unwrap();
        assert_eq!(chunks[0], "a".repeat(51));
        let bs: usize = chunks.iter().map(|c| c.matches('b').count()).max().unwrap();
        assert_eq!(bs, 100);
        assert!(chunks.last().unwrap().ends_with('b'));

        let chars: Vec<char> = text.chars().collect();
        let windows = chunk_windows(&chars, 100, 90).unwrap();
        assert_eq!(windows.last().unwrap().1, chars.len());
    }

    #[test]
    fn extra_whitespace_does_not_change_boundaries() {
        let text = numbered_words(300);
        let noisy = text.replace(' ', " \n\t  ");
        assert_eq!(
            chunk_text(&text, 120, 15).unwrap(),
            chunk_text(&noisy, 120, 15).unwrap()
        );
    }

    #[test]
    fn split_document_numbers_chunks() {
        let text = numbered_words(300);
        let chunks = split_document(&text, "manual.pdf", 200, 20).unwrap();
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.total_chunks, chunks.len());
            assert_eq!(chunk.source, "manual.pdf");
        }
    }
}
