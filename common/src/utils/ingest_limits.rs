use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the raw size of a single uploaded file (10 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unsupported mime type: {0}")]
    UnsupportedMimeType(String),
    #[error("File is too large ({size} bytes). Maximum allowed is {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },
    #[error("File is empty")]
    EmptyPayload,
    #[error("Original file name is missing")]
    MissingFileName,
}

/// Formats accepted for ingestion, resolved once from the declared mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    LegacyWord,
    Word,
    Jpeg,
    Png,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 5] = [
        DocumentFormat::Pdf,
        DocumentFormat::LegacyWord,
        DocumentFormat::Word,
        DocumentFormat::Jpeg,
        DocumentFormat::Png,
    ];

    /// Resolves a declared mime type against the allow-list. Parameters such as
    /// `charset` are ignored and the comparison is case-insensitive.
    pub fn from_mime(declared: &str) -> Option<Self> {
        let parsed: mime::Mime = declared.trim().parse().ok()?;
        let essence = parsed.essence_str().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_mime() == essence)
    }

    pub fn as_mime(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => MIME_PDF,
            DocumentFormat::LegacyWord => MIME_DOC,
            DocumentFormat::Word => MIME_DOCX,
            DocumentFormat::Jpeg => MIME_JPEG,
            DocumentFormat::Png => MIME_PNG,
        }
    }

    pub fn is_image(self) -> bool {
        matches!(self, DocumentFormat::Jpeg | DocumentFormat::Png)
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_mime())
    }
}

/// Checks an upload before anything is persisted.
pub fn validate_upload(
    original_name: &str,
    declared_mime: &str,
    size_bytes: u64,
) -> Result<DocumentFormat, ValidationError> {
    if original_name.trim().is_empty() {
        return Err(ValidationError::MissingFileName);
    }

    let format = DocumentFormat::from_mime(declared_mime)
        .ok_or_else(|| ValidationError::UnsupportedMimeType(declared_mime.to_string()))?;

    if size_bytes == 0 {
        return Err(ValidationError::EmptyPayload);
    }

    if size_bytes > MAX_UPLOAD_BYTES {
        return Err(ValidationError::PayloadTooLarge {
            size: size_bytes,
            limit: MAX_UPLOAD_BYTES,
        });
    }

    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_upload_accepts_every_allowed_format() {
        for format in DocumentFormat::ALL {
            let result = validate_upload("upload.bin", format.as_mime(), 1024);
            assert_eq!(result, Ok(format));
        }
    }

    #[test]
    fn validate_upload_rejects_plain_text() {
        let result = validate_upload("notes.txt", "text/plain", 12);

        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedMimeType(mime)) if mime == "text/plain"
        ));
    }

    #[test]
    fn validate_upload_ignores_parameters_and_case() {
        let result = validate_upload("lecture.pdf", "Application/PDF; charset=binary", 10);

        assert_eq!(result, Ok(DocumentFormat::Pdf));
    }

    #[test]
    fn validate_upload_rejects_unknown_image_aliases() {
        assert!(validate_upload("photo.jpg", "image/jpg", 10).is_err());
        assert!(validate_upload("scan.gif", "image/gif", 10).is_err());
    }

    #[test]
    fn validate_upload_enforces_size_ceiling() {
        assert_eq!(
            validate_upload("big.pdf", MIME_PDF, MAX_UPLOAD_BYTES),
            Ok(DocumentFormat::Pdf)
        );

        let result = validate_upload("big.pdf", MIME_PDF, MAX_UPLOAD_BYTES + 1);
        assert!(matches!(
            result,
            Err(ValidationError::PayloadTooLarge { limit, .. }) if limit == MAX_UPLOAD_BYTES
        ));
    }

    #[test]
    fn validate_upload_rejects_empty_payload_and_name() {
        assert_eq!(
            validate_upload("empty.png", MIME_PNG, 0),
            Err(ValidationError::EmptyPayload)
        );
        assert_eq!(
            validate_upload("   ", MIME_PNG, 10),
            Err(ValidationError::MissingFileName)
        );
    }

    #[test]
    fn garbage_mime_is_unsupported() {
        assert_eq!(DocumentFormat::from_mime("not a mime"), None);
        assert_eq!(DocumentFormat::from_mime(""), None);
    }
}
