use bytes::Bytes;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::Document},
};
use tracing::error;

use crate::utils::{chunking::TextFragment, file_text_extraction::ExtractedText};

use super::{config::IngestionConfig, services::PipelineServices};

pub struct PipelineContext<'a> {
    pub document: &'a Document,
    pub document_id: String,
    pub run_id: String,
    pub attempt: u32,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub source: Option<Bytes>,
    pub extracted: Option<ExtractedText>,
    pub fragments: Vec<TextFragment>,
    pub committed: Option<Document>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        document: &'a Document,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        Self {
            document,
            document_id: document.id.clone(),
            run_id: document.run_id.clone().unwrap_or_default(),
            attempt: document.attempts,
            db,
            pipeline_config,
            services,
            source: None,
            extracted: None,
            fragments: Vec::new(),
            committed: None,
        }
    }

    pub fn take_source(&mut self) -> Result<Bytes, AppError> {
        self.source.take().ok_or_else(|| {
            AppError::InternalError("source bytes expected to be fetched before extraction".into())
        })
    }

    pub fn extracted(&self) -> Result<&ExtractedText, AppError> {
        self.extracted
            .as_ref()
            .ok_or_else(|| AppError::InternalError("extracted text expected to be available".into()))
    }

    pub fn take_committed(&mut self) -> Result<Document, AppError> {
        self.committed.take().ok_or_else(|| {
            AppError::InternalError("committed document expected after the commit stage".into())
        })
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            document_id = %self.document_id,
            run_id = %self.run_id,
            attempt = self.attempt,
            error_code = err.code(),
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
