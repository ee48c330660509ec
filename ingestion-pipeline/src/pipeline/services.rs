use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{store::StorageManager, types::document::Document},
    utils::ingest_limits::DocumentFormat,
};

use crate::utils::{
    chunking::{TextChunker, TextFragment},
    file_text_extraction::{ExtractedText, ExtractorRegistry},
    image_parsing::ImageOcrExtractor,
};

use super::config::IngestionConfig;

/// Side-effecting collaborators of a pipeline run. Committing results stays in the pipeline.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn fetch_source(&self, document: &Document) -> Result<Bytes, AppError>;

    async fn extract_text(
        &self,
        bytes: Bytes,
        format: DocumentFormat,
    ) -> Result<ExtractedText, AppError>;

    async fn split_text(&self, text: &str) -> Result<Vec<TextFragment>, AppError>;
}

pub struct DefaultPipelineServices {
    storage: StorageManager,
    extractors: ExtractorRegistry,
    chunker: TextChunker,
}

impl DefaultPipelineServices {
    pub fn new(
        storage: StorageManager,
        extractors: ExtractorRegistry,
        pipeline_config: &IngestionConfig,
    ) -> Result<Self, AppError> {
        let chunker = TextChunker::new(
            pipeline_config.tuning.chunk_max_chars,
            pipeline_config.tuning.chunk_overlap_chars,
        )?;

        Ok(Self {
            storage,
            extractors,
            chunker,
        })
    }

    /// Built-in extractors, with OCR going through `openai_client`.
    pub fn with_default_extractors(
        storage: StorageManager,
        openai_client: Arc<Client<OpenAIConfig>>,
        pipeline_config: &IngestionConfig,
    ) -> Result<Self, AppError> {
        let ocr = ImageOcrExtractor::new(openai_client, pipeline_config.ocr_model.clone());
        Self::new(storage, ExtractorRegistry::with_defaults(ocr), pipeline_config)
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch_source(&self, document: &Document) -> Result<Bytes, AppError> {
        let bytes = self
            .storage
            .get(&document.storage_location)
            .await
            .map_err(|err| match err {
                object_store::Error::NotFound { .. } => AppError::StorageFetch(format!(
                    "raw bytes missing at {}",
                    document.storage_location
                )),
                other => AppError::StorageFetch(format!(
                    "failed to read {}: {other}",
                    document.storage_location
                )),
            })?;

        if u64::try_from(bytes.len()).ok() != Some(document.size_bytes) {
            return Err(AppError::StorageFetch(format!(
                "stored object has {} bytes, expected {}",
                bytes.len(),
                document.size_bytes
            )));
        }

        Ok(bytes)
    }

    async fn extract_text(
        &self,
        bytes: Bytes,
        format: DocumentFormat,
    ) -> Result<ExtractedText, AppError> {
        self.extractors.extract(bytes, format).await
    }

    async fn split_text(&self, text: &str) -> Result<Vec<TextFragment>, AppError> {
        self.chunker.split(text)
    }
}
