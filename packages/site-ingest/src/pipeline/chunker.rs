//! Paragraph-aware text chunking.
//!
//! Paragraphs (blank-line separated) are packed greedily up to
//! `max_chars`. Paragraphs that are too long on their own are cut at word
//! boundaries. When a chunk closes, trailing pieces totalling at most
//! `overlap_chars` are carried into the next one.

/// Splits page text into embedding-sized chunks.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1500, 150)
    }
}

impl Chunker {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            max_chars,
            overlap_chars: overlap_chars.min(max_chars - 1),
        }
    }

    /// Ordered chunks for `text`. Fragments without any alphanumeric
    /// character are dropped, so punctuation-only input yields nothing.
    pub fn split(&self, text: &str) -> Vec<String> {
        let pieces: Vec<String> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .flat_map(|p| self.split_long(p))
            .collect();

        let mut chunks = Vec::new();
        let mut buffer: Vec<usize> = Vec::new();
        let mut buffer_chars = 0usize;

        for (idx, piece) in pieces.iter().enumerate() {
            let len = char_len(piece);
            if !buffer.is_empty() && buffer_chars + 2 + len > self.max_chars {
                self.flush(&mut chunks, &buffer, &pieces);
                buffer = self.retain_overlap(&buffer, &pieces);
                buffer_chars = joined_len(&buffer, &pieces);
                if !buffer.is_empty() && buffer_chars + 2 + len > self.max_chars {
                    buffer.clear();
                    buffer_chars = 0;
                }
            }

            buffer_chars = if buffer.is_empty() { len } else { buffer_chars + 2 + len };
            buffer.push(idx);
        }

        // The last piece pushed has not been emitted yet
        if !buffer.is_empty() {
            self.flush(&mut chunks, &buffer, &pieces);
        }

        chunks
    }

    fn flush(&self, chunks: &mut Vec<String>, buffer: &[usize], pieces: &[String]) {
        let text = buffer
            .iter()
            .map(|&i| pieces[i].as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        if text.chars().any(char::is_alphanumeric) {
            chunks.push(text);
        }
    }

    fn retain_overlap(&self, buffer: &[usize], pieces: &[String]) -> Vec<usize> {
        let mut retained = Vec::new();
        let mut total = 0usize;
        for &idx in buffer.iter().rev() {
            let len = char_len(&pieces[idx]) + if retained.is_empty() { 0 } else { 2 };
            if total + len > self.overlap_chars {
                break;
            }
            total += len;
            retained.push(idx);
        }
        retained.reverse();
        retained
    }

    /// Cut an oversized paragraph into word-boundary pieces of at most
    /// `max_chars`; single words longer than that are cut mid-word.
    fn split_long(&self, paragraph: &str) -> Vec<String> {
        if char_len(paragraph) <= self.max_chars {
            return vec![paragraph.to_string()];
        }

        let mut pieces = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;

        for word in paragraph.split_whitespace() {
            let word_len = char_len(word);
            if word_len > self.max_chars {
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let chars: Vec<char> = word.chars().collect();
                for window in chars.chunks(self.max_chars) {
                    pieces.push(window.iter().collect());
                }
                continue;
            }

            let needed = if current.is_empty() { word_len } else { current_len + 1 + word_len };
            if needed > self.max_chars {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(word);
            current_len += word_len;
        }

        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn joined_len(buffer: &[usize], pieces: &[String]) -> usize {
    if buffer.is_empty() {
        return 0;
    }
    buffer.iter().map(|&i| char_len(&pieces[i])).sum::<usize>() + 2 * (buffer.len() - 1)
}
