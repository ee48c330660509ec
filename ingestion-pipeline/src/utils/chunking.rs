use common::error::AppError;
use text_splitter::{ChunkConfig, TextSplitter};

/// One ordered piece of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    pub index: u32,
    /// Byte offset of `content` inside the text that was split.
    pub byte_offset: usize,
    pub content: String,
}

impl TextFragment {
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Character-window splitter that prefers paragraph and sentence boundaries.
///
/// Output depends only on the input text and the two sizes, so re-running a document
/// produces the same fragments.
pub struct TextChunker {
    max_chars: usize,
    overlap_chars: usize,
    splitter: TextSplitter<text_splitter::Characters>,
}

impl std::fmt::Debug for TextChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextChunker")
            .field("max_chars", &self.max_chars)
            .field("overlap_chars", &self.overlap_chars)
            .finish()
    }
}

impl TextChunker {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, AppError> {
        if max_chars == 0 {
            return Err(AppError::Chunking(
                "chunk window must be at least one character".into(),
            ));
        }
        if overlap_chars >= max_chars {
            return Err(AppError::Chunking(format!(
                "chunk overlap ({overlap_chars}) must be smaller than the window ({max_chars})"
            )));
        }

        let config = ChunkConfig::new(max_chars)
            .with_overlap(overlap_chars)
            .map_err(|e| AppError::Chunking(format!("invalid chunk overlap: {e}")))?;

        Ok(Self {
            max_chars,
            overlap_chars,
            splitter: TextSplitter::new(config),
        })
    }

    /// Splits `text` into fragments numbered from zero. Blank text is an error.
    pub fn split(&self, text: &str) -> Result<Vec<TextFragment>, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::Chunking(
                "no text to chunk: extraction produced an empty document".into(),
            ));
        }

        let fragments = self
            .splitter
            .chunk_indices(text)
            .filter(|(_, chunk)| !chunk.trim().is_empty())
            .enumerate()
            .map(|(index, (byte_offset, chunk))| {
                let index = u32::try_from(index)
                    .map_err(|_| AppError::Chunking("too many chunks for one document".into()))?;
                Ok(TextFragment {
                    index,
                    byte_offset,
                    content: chunk.to_string(),
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        if fragments.is_empty() {
            return Err(AppError::Chunking("splitter produced no fragments".into()));
        }

        Ok(fragments)
    }
}
