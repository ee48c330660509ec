use async_trait::async_trait;
use bytes::Bytes;
use common::{error::AppError, utils::ingest_limits::DocumentFormat};
use lopdf::Document;
use tracing::debug;

use super::file_text_extraction::TextExtractor;

/// Reads the text layer of a PDF. Scanned PDFs without a text layer yield empty text.
pub struct PdfExtractor;

#[async_trait]
impl TextExtractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    async fn extract(&self, bytes: Bytes, _format: DocumentFormat) -> Result<String, AppError> {
        let page_count = load_page_count(bytes.clone()).await?;
        let text = extract_text_layer(bytes).await?;

        debug!(
            page_count,
            text_chars = text.chars().count(),
            "pdf text layer extracted"
        );

        Ok(text)
    }
}

/// Parses the PDF structure off the async executor. Also rejects encrypted files.
async fn load_page_count(pdf_bytes: Bytes) -> Result<usize, AppError> {
    tokio::task::spawn_blocking(move || -> Result<usize, AppError> {
        let document = Document::load_mem(&pdf_bytes)
            .map_err(|err| AppError::Extraction(format!("Failed to parse PDF: {err}")))?;
        if document.is_encrypted() {
            return Err(AppError::Extraction(
                "Encrypted PDFs are not supported".to_string(),
            ));
        }
        let pages = document.get_pages().len();
        if pages == 0 {
            return Err(AppError::Extraction("PDF contains no pages".to_string()));
        }
        Ok(pages)
    })
    .await
    .map_err(|err| AppError::Extraction(format!("PDF parser crashed: {err}")))?
}

/// `pdf-extract` can panic on malformed input; the blocking task turns that into an error.
async fn extract_text_layer(pdf_bytes: Bytes) -> Result<String, AppError> {
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&pdf_bytes))
        .await
        .map_err(|err| AppError::Extraction(format!("PDF text extraction crashed: {err}")))?
        .map_err(|err| AppError::Extraction(format!("Failed to extract text from PDF: {err}")))?;

    // Page breaks become paragraph breaks.
    Ok(text.replace('\u{000c}', "\n\n"))
}
