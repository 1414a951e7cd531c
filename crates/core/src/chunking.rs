use crate::error::{EngineError, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use tiktoken_rs::CoreBPE;

/// Splits document text into overlapping, token-bounded chunks.
///
/// Sections are cut on the original text first (headings and blank lines),
/// so window boundaries stay aligned to document structure; each section is
/// then normalized and sliced into BPE token windows.
pub struct Chunker {
    bpe: CoreBPE,
    heading: Regex,
    fenced_code: Regex,
    markup_tag: Regex,
    chunk_tokens: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_tokens: usize, chunk_overlap: usize) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|error| EngineError::Tokenizer(error.to_string()))?;

        Ok(Self {
            bpe,
            heading: Regex::new(r"^#{1,6} ")?,
            fenced_code: Regex::new(r"(?s)```.*?```")?,
            markup_tag: Regex::new(r"<[^>]+>")?,
            chunk_tokens: chunk_tokens.max(1),
            chunk_overlap,
        })
    }

    /// Produces the ordered chunk sequence for one document. Empty input
    /// yields an empty sequence.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();

        for section in self.split_sections(text) {
            let normalized = self.normalize(&section);
            if normalized.is_empty() {
                continue;
            }

            let tokens = self.bpe.encode_ordinary(&normalized);
            // overlap >= chunk size would loop forever without the clamp
            let step = self.chunk_tokens.saturating_sub(self.chunk_overlap).max(1);

            let mut start = 0;
            while start < tokens.len() {
                let end = (start + self.chunk_tokens).min(tokens.len());
                if let Ok(piece) = self.bpe.decode(tokens[start..end].to_vec()) {
                    let piece = piece.trim();
                    if !piece.is_empty() {
                        chunks.push(piece.to_string());
                    }
                }
                if end == tokens.len() {
                    break;
                }
                start += step;
            }
        }

        chunks
    }

    /// Scans the ORIGINAL text line by line; a heading line closes the
    /// buffered section and opens the next one, a blank line just closes.
    fn split_sections(&self, text: &str) -> Vec<String> {
        let mut sections = Vec::new();
        let mut current = String::new();

        let flush = |buffer: &mut String, sections: &mut Vec<String>| {
            if !buffer.trim().is_empty() {
                sections.push(std::mem::take(buffer));
            } else {
                buffer.clear();
            }
        };

        for line in text.lines() {
            if self.heading.is_match(line) {
                flush(&mut current, &mut sections);
                current.push_str(line);
                current.push('\n');
            } else if line.trim().is_empty() {
                flush(&mut current, &mut sections);
            } else {
                current.push_str(line);
                current.push('\n');
            }
        }
        flush(&mut current, &mut sections);

        sections
    }

    /// Strips fenced code blocks and markup tags, collapses whitespace runs.
    fn normalize(&self, text: &str) -> String {
        let without_code = self.fenced_code.replace_all(text, " ");
        let without_tags = self.markup_tag.replace_all(&without_code, " ");
        without_tags.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Deterministic chunk identifier: the same logical chunk maps to the same
/// id across full rebuilds.
pub fn chunk_id(source: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{chunk_id, Chunker};

    #[test]
    fn empty_document_yields_no_chunks() {
        let chunker = Chunker::new(100, 10).unwrap();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\n  ").is_empty());
    }

    #[test]
    fn headings_close_sections() {
        let chunker = Chunker::new(512, 0).unwrap();
        let text = "# First\nalpha line\n## Second\nbeta line";
        let chunks = chunker.chunk(text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("alpha"));
        assert!(!chunks[0].contains("beta"));
        assert!(chunks[1].contains("beta"));
    }

    #[test]
    fn blank_lines_close_sections() {
        let chunker = Chunker::new(512, 0).unwrap();
        let chunks = chunker.chunk("first paragraph\n\nsecond paragraph");
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn fenced_code_and_tags_are_stripped() {
        let chunker = Chunker::new(512, 0).unwrap();
        let text = "before ```rust\nfn secret() {}\n``` after <b>bold</b>";
        let joined = chunker.chunk(text).join(" ");
        assert!(joined.contains("before"));
        assert!(joined.contains("after"));
        assert!(joined.contains("bold"));
        assert!(!joined.contains("secret"));
        assert!(!joined.contains("<b>"));
    }

    #[test]
    fn long_sections_split_into_overlapping_windows() {
        let chunker = Chunker::new(8, 2).unwrap();
        let text = (0..60).map(|n| format!("word{n}")).collect::<Vec<_>>().join(" ");
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        // overlap repeats trailing tokens of one window at the head of the next
        assert!(chunks.windows(2).any(|pair| {
            let tail = pair[0].split_whitespace().last().unwrap();
            pair[1].contains(tail)
        }));
    }

    #[test]
    fn oversized_overlap_still_terminates() {
        let chunker = Chunker::new(4, 10).unwrap();
        let text = (0..30).map(|n| format!("tok{n}")).collect::<Vec<_>>().join(" ");
        let chunks = chunker.chunk(&text);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn chunk_ids_are_stable_and_ordinal_sensitive() {
        assert_eq!(chunk_id("docs/a.md", 0), chunk_id("docs/a.md", 0));
        assert_ne!(chunk_id("docs/a.md", 0), chunk_id("docs/a.md", 1));
        assert_ne!(chunk_id("docs/a.md", 0), chunk_id("docs/b.md", 0));
    }
}
