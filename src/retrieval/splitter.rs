//! Paragraph splitter that packs pieces into overlapping chunks

use std::collections::VecDeque;

const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Splits text on blank lines and greedily merges the pieces
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separator: String,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separator: PARAGRAPH_SEPARATOR.to_string(),
        }
    }

    /// Split `text` into chunks of at most `chunk_size` characters.
    ///
    /// A single paragraph longer than `chunk_size` is kept whole.
    pub fn split(&self, text: &str) -> Vec<String> {
        let sep_len = self.separator.chars().count();
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in text.split(self.separator.as_str()).filter(|p| !p.is_empty()) {
            let len = piece.chars().count();
            let joined_len = |current: &VecDeque<&str>, total: usize| {
                total + len + if current.is_empty() { 0 } else { sep_len }
            };

            if joined_len(&current, total) > self.chunk_size && !current.is_empty() {
                self.emit(&current, &mut chunks);

                // Carry a tail of at most `chunk_overlap` characters forward
                while total > self.chunk_overlap
                    || (total > 0 && joined_len(&current, total) > self.chunk_size)
                {
                    let Some(front) = current.pop_front() else { break };
                    total -= front.chars().count() + if current.is_empty() { 0 } else { sep_len };
                }
            }

            total += len + if current.is_empty() { 0 } else { sep_len };
            current.push_back(piece);
        }

        self.emit(&current, &mut chunks);
        chunks
    }

    fn emit(&self, pieces: &VecDeque<&str>, chunks: &mut Vec<String>) {
        let joined = pieces
            .iter()
            .copied()
            .collect::<Vec<_>>()
            .join(&self.separator);
        let trimmed = joined.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(200, 50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = TextSplitter::default();
        assert_eq!(splitter.split("Breathe slowly.\n\nDrink water."), vec![
            "Breathe slowly.\n\nDrink water."
        ]);
    }

    #[test]
    fn test_paragraphs_are_packed_with_overlap() {
        let splitter = TextSplitter::new(20, 10);
        let chunks = splitter.split("aaaaaaaa\n\nbbbbbbbb\n\ncccccccc");
        assert_eq!(chunks, vec!["aaaaaaaa\n\nbbbbbbbb", "bbbbbbbb\n\ncccccccc"]);
    }

    #[test]
    fn test_overlap_never_exceeds_limit() {
        let splitter = TextSplitter::new(20, 5);
        let chunks = splitter.split("aaaaaaaa\n\nbbbbbbbb\n\ncccccccc");
        assert_eq!(chunks, vec!["aaaaaaaa\n\nbbbbbbbb", "cccccccc"]);
    }

    #[test]
    fn test_oversized_paragraph_kept_whole() {
        let splitter = TextSplitter::new(10, 2);
        let long = "x".repeat(25);
        let text = format!("short\n\n{}\n\ntail", long);
        let chunks = splitter.split(&text);
        assert_eq!(chunks, vec!["short".to_string(), long, "tail".to_string()]);
    }

    #[test]
    fn test_whitespace_chunks_dropped() {
        let splitter = TextSplitter::default();
        assert!(splitter.split("\n\n   \n\n").is_empty());
        assert!(splitter.split("").is_empty());
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        let splitter = TextSplitter::new(10, 0);
        let chunks = splitter.split("ééééé\n\nüüüü");
        assert_eq!(chunks, vec!["ééééé", "üüüü"]);
    }
}
