use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use common::{error::AppError, utils::ingest_limits::DocumentFormat};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use super::{
    image_parsing::ImageOcrExtractor,
    pdf_ingestion::PdfExtractor,
    word_extraction::{DocxExtractor, LegacyDocExtractor},
};

/// Converts the raw bytes of one document format into text.
///
/// Implementations return the text as found; [`ExtractorRegistry::extract`] normalizes it.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, bytes: Bytes, format: DocumentFormat) -> Result<String, AppError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub extractor: &'static str,
    pub format: DocumentFormat,
}

/// Explicit format → extractor table. A format without an entry is an error, never a fallback.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<DocumentFormat, Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in extractors for every accepted format.
    pub fn with_defaults(ocr: ImageOcrExtractor) -> Self {
        let mut registry = Self::new();
        let ocr = Arc::new(ocr);

        registry.register(DocumentFormat::Pdf, Arc::new(PdfExtractor));
        registry.register(DocumentFormat::Word, Arc::new(DocxExtractor));
        registry.register(DocumentFormat::LegacyWord, Arc::new(LegacyDocExtractor));
        registry.register(DocumentFormat::Jpeg, Arc::clone(&ocr) as Arc<dyn TextExtractor>);
        registry.register(DocumentFormat::Png, ocr);

        registry
    }

    pub fn register(&mut self, format: DocumentFormat, extractor: Arc<dyn TextExtractor>) {
        self.extractors.insert(format, extractor);
    }

    pub fn get(&self, format: DocumentFormat) -> Result<Arc<dyn TextExtractor>, AppError> {
        self.extractors.get(&format).cloned().ok_or_else(|| {
            AppError::Extraction(format!("no extractor registered for {format}"))
        })
    }

    pub async fn extract(
        &self,
        bytes: Bytes,
        format: DocumentFormat,
    ) -> Result<ExtractedText, AppError> {
        let extractor = self.get(format)?;
        let raw_len = bytes.len();
        let raw = extractor.extract(bytes, format).await?;
        let text = normalize_text(&raw);

        debug!(
            extractor = extractor.name(),
            %format,
            raw_bytes = raw_len,
            text_chars = text.chars().count(),
            "text extracted"
        );

        Ok(ExtractedText {
            text,
            extractor: extractor.name(),
            format,
        })
    }
}

/// Canonical text form shared by every extractor.
///
/// NFC, `\n` line endings, no control characters, single spaces, trimmed lines and at most
/// one blank line between paragraphs.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;

    for line in unified.nfc().collect::<String>().split('\n') {
        let mut cleaned = String::with_capacity(line.len());
        let mut pending_space = false;

        for ch in line.chars() {
            if ch.is_whitespace() {
                pending_space = true;
                continue;
            }
            if ch.is_control() || matches!(ch, '\u{feff}' | '\u{200b}') {
                continue;
            }
            if pending_space && !cleaned.is_empty() {
                cleaned.push(' ');
            }
            pending_space = false;
            cleaned.push(ch);
        }

        if cleaned.is_empty() {
            blank_run = blank_run.saturating_add(1);
            continue;
        }

        if !out.is_empty() {
            out.push('\n');
            if blank_run > 0 {
                out.push('\n');
            }
        }
        blank_run = 0;
        out.push_str(&cleaned);
    }

    out
}
