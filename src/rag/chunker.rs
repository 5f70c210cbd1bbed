//! Text chunking
//!
//! Paragraph-first accumulation under a character budget, with a
//! configurable overlap carried between consecutive chunks so sentences
//! split at a boundary stay retrievable from both sides. Oversized
//! paragraphs are hard-split at UTF-8 safe offsets.

/// Splits text into overlapping chunks bounded by a character budget.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        // Overlap must leave room for new content in every chunk
        let chunk_overlap = chunk_overlap.min(chunk_size / 2);
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split text into chunks. Empty or whitespace-only input yields no
    /// chunks, so a document that shrank to nothing clears its index.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut buffer = String::new();

        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            for piece in self.hard_split(paragraph) {
                let needed = if buffer.is_empty() {
                    piece.len()
                } else {
                    buffer.len() + 2 + piece.len()
                };
                if needed > self.chunk_size && !buffer.is_empty() {
                    self.flush(&mut buffer, &mut chunks);
                    // Drop the overlap seed when it cannot fit next to the piece
                    if !buffer.is_empty() && buffer.len() + 2 + piece.len() > self.chunk_size {
                        buffer.clear();
                    }
                }
                if !buffer.is_empty() {
                    buffer.push_str("\n\n");
                }
                buffer.push_str(piece);
            }
        }

        if !buffer.trim().is_empty() {
            chunks.push(buffer.trim().to_string());
        }
        chunks
    }

    /// Close the current chunk and seed the next buffer with the overlap
    /// tail of the closed one.
    fn flush(&self, buffer: &mut String, chunks: &mut Vec<String>) {
        let chunk = buffer.trim().to_string();
        if chunk.is_empty() {
            buffer.clear();
            return;
        }
        let tail = overlap_tail(&chunk, self.chunk_overlap).to_string();
        chunks.push(chunk);
        buffer.clear();
        buffer.push_str(&tail);
    }

    /// Break a single paragraph that exceeds the budget into budget-sized
    /// pieces, preferring whitespace boundaries.
    fn hard_split<'a>(&self, paragraph: &'a str) -> Vec<&'a str> {
        if paragraph.len() <= self.chunk_size {
            return vec![paragraph];
        }

        let mut pieces = Vec::new();
        let mut rest = paragraph;
        while rest.len() > self.chunk_size {
            let mut cut = snap_to_char_boundary(rest, self.chunk_size);
            // Prefer the last whitespace inside the window
            if let Some(ws) = rest[..cut].rfind(char::is_whitespace) {
                if ws > 0 {
                    cut = ws;
                }
            }
            // A character wider than the budget snaps the cut to 0; take it
            // whole so the loop always advances
            if cut == 0 {
                cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
            }
            let (head, tail) = rest.split_at(cut);
            let head = head.trim_end();
            if !head.is_empty() {
                pieces.push(head);
            }
            rest = tail.trim_start();
        }
        if !rest.is_empty() {
            pieces.push(rest);
        }
        pieces
    }
}

/// Last `max_len` bytes of `chunk`, snapped forward to a char boundary and
/// then to the next word start so the overlap never opens mid-word.
fn overlap_tail(chunk: &str, max_len: usize) -> &str {
    if max_len == 0 || chunk.len() <= max_len {
        return if max_len == 0 { "" } else { chunk };
    }
    let mut start = snap_to_char_boundary(chunk, chunk.len() - max_len);
    if let Some(ws) = chunk[start..].find(char::is_whitespace) {
        start += ws;
    }
    chunk[start..].trim_start()
}

/// Largest byte offset `<= target` that lands on a char boundary.
fn snap_to_char_boundary(s: &str, target: usize) -> usize {
    let mut i = target.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
