pub mod chunking;
pub mod file_text_extraction;
pub mod image_parsing;
pub mod pdf_ingestion;
pub mod word_extraction;
