use crate::error::IngestError;
use crate::models::Chunk;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestError> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Character span `[start, end)` of one emitted window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

/// Windows over `text` in characters, preferring to end on `.` or a line break.
pub fn chunk_spans(text: &str, config: ChunkingConfig) -> Result<Vec<ChunkSpan>, IngestError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = (start + config.chunk_size).min(len);

        if end < len {
            let break_point = chars[start..end]
                .iter()
                .rposition(|c| *c == '.' || *c == '\n');
            if let Some(offset) = break_point {
                if offset > config.chunk_size / 2 {
                    end = start + offset + 1;
                }
            }
        }

        spans.push(ChunkSpan { start, end });

        if end >= len {
            break;
        }

        // A shrunk window can end before `start + overlap`; drop the overlap then.
        let next = end.saturating_sub(config.chunk_overlap);
        start = if next > start { next } else { end };
    }

    Ok(spans)
}

pub fn split_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    let chars: Vec<char> = text.chars().collect();
    let chunks = chunk_spans(text, config)?
        .into_iter()
        .map(|span| chars[span.start..span.end].iter().collect::<String>())
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect();
    Ok(chunks)
}

/// Chunks every page of a document, numbering them across the whole document.
pub fn build_chunks(
    source_document: &str,
    pages: &[(Option<u32>, &str)],
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let mut chunks = Vec::new();

    for (page, text) in pages {
        for piece in split_text(text, config)? {
            chunks.push(Chunk {
                text: piece,
                source_document: source_document.to_string(),
                chunk_index: chunks.len(),
                total_chunks: 0,
                page: *page,
            });
        }
    }

    let total = chunks.len();
    for chunk in &mut chunks {
        chunk.total_chunks = total;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig::new(size, overlap).unwrap()
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("  A short resume.  ", ChunkingConfig::default()).unwrap();
        assert_eq!(chunks, vec!["A short resume.".to_string()]);
    }

    #[test]
    fn blank_text_yields_nothing() {
        assert!(split_text("   \n\t ", ChunkingConfig::default())
            .unwrap()
            .is_empty());
        assert!(split_text("", ChunkingConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn overlap_not_smaller_than_size_is_rejected() {
        assert!(matches!(
            ChunkingConfig::new(100, 100),
            Err(IngestError::InvalidChunkConfig(_))
        ));
        assert!(ChunkingConfig::new(0, 0).is_err());

        let unchecked = ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 20,
        };
        assert!(split_text("some text that is long enough", unchecked).is_err());
    }

    #[test]
    fn windows_prefer_sentence_boundaries() {
        let text = "First sentence is here. Second sentence follows it closely and runs on";
        let spans = chunk_spans(text, config(30, 5)).unwrap();
        let first: String = text.chars().take(spans[0].end).collect();
        assert_eq!(first, "First sentence is here.");
    }

    #[test]
    fn spans_cover_the_text_with_bounded_overlap() {
        let text = "Rust services. Kubernetes operators.\nDistributed consensus and storage engines. "
            .repeat(25);
        let chunking = config(120, 30);
        let spans = chunk_spans(&text, chunking).unwrap();

        assert_eq!(spans[0].start, 0);
        assert_eq!(spans.last().unwrap().end, text.chars().count());
        for pair in spans.windows(2) {
            assert!(pair[1].start <= pair[0].end, "gap between windows");
            assert!(pair[1].start > pair[0].start, "window did not advance");
            let overlap = pair[0].end - pair[1].start;
            assert!(overlap <= chunking.chunk_overlap);
        }
        for chunk in split_text(&text, chunking).unwrap() {
            assert!(!chunk.trim().is_empty());
            assert!(chunk.chars().count() <= chunking.chunk_size);
        }
    }

    #[test]
    fn large_overlap_with_early_break_still_advances() {
        // Break at offset 6 (> 10 / 2) shrinks the window below the overlap.
        let text = "abcdef.ghijklmnopqrstuvwxyz.abcdefghijklmnop";
        let spans = chunk_spans(text, config(10, 8)).unwrap();
        assert_eq!(spans.last().unwrap().end, text.chars().count());
        for pair in spans.windows(2) {
            assert!(pair[1].start > pair[0].start);
            assert!(pair[0].end - pair[1].start <= 8);
        }
    }

    #[test]
    fn multibyte_text_is_split_on_characters() {
        let text = "é".repeat(50);
        let chunks = split_text(&text, config(20, 5)).unwrap();
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 20));
        assert!(chunks.len() >= 3);
    }

    #[test]
    fn build_chunks_numbers_across_pages() {
        let pages = [(Some(1), "Page one text."), (Some(2), "Page two text.")];
        let chunks = build_chunks("cv.pdf", &pages, ChunkingConfig::default()).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].page, Some(2));
        assert!(chunks.iter().all(|chunk| chunk.total_chunks == 2));
        assert_eq!(chunks[0].source_document, "cv.pdf");
    }
}
