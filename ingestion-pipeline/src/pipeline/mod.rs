mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::document::{Document, DocumentFailure, DocumentTransition},
    },
};
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{commit_chunks, extract_text, fetch_source, split_text},
    state::ready,
};

/// Runs one document through fetch, extraction, chunking and commit.
///
/// A run owns its document from the `PROCESSING` claim until it persists either
/// `COMPLETED` or `FAILED`.
#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<OpenAIConfig>>,
        storage: StorageManager,
        pipeline_config: IngestionConfig,
    ) -> Result<Self, AppError> {
        let services =
            DefaultPipelineServices::with_default_extractors(storage, openai_client, &pipeline_config)?;

        Self::with_services(db, pipeline_config, Arc::new(services))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            db,
            pipeline_config,
            services,
        })
    }

    /// Claims a `PENDING` document and runs it to a terminal status.
    ///
    /// Documents that already left `PENDING` are rejected without a run; recovering a
    /// `FAILED` document goes through an explicit reprocess.
    #[tracing::instrument(skip_all, fields(document_id = %document_id))]
    pub async fn process_document(&self, document_id: &str) -> Result<Document, AppError> {
        let claimed =
            Document::claim_for_processing(document_id, DocumentTransition::Start, &self.db)
                .await?;
        self.run_claimed(claimed).await
    }

    /// Drives an already claimed document and persists the outcome.
    ///
    /// Pipeline failures are recorded on the document and returned as `Ok` with the
    /// `FAILED` record. `Err` means no outcome could be persisted: the run lost ownership
    /// of the document, or the database rejected the write.
    #[tracing::instrument(
        skip_all,
        fields(
            document_id = %document.id,
            run_id = document.run_id.as_deref().unwrap_or("unclaimed"),
            attempt = document.attempts
        )
    )]
    pub async fn run_claimed(&self, document: Document) -> Result<Document, AppError> {
        match self.drive_pipeline(&document).await {
            Ok(completed) => {
                info!(
                    document_id = %completed.id,
                    attempt = completed.attempts,
                    chunk_count = completed.chunk_count,
                    "document ingestion completed"
                );
                Ok(completed)
            }
            Err(err @ AppError::ConcurrencyConflict(_)) => {
                warn!(
                    document_id = %document.id,
                    attempt = document.attempts,
                    error = %err,
                    "ingestion run lost ownership of the document; discarding results"
                );
                Err(err)
            }
            Err(err) => {
                let failure = DocumentFailure::from(&err);
                let failed = document.mark_failed(&failure, &self.db).await?;
                warn!(
                    document_id = %failed.id,
                    attempt = failed.attempts,
                    error_code = %failure.code,
                    error = %failure.message,
                    "document ingestion failed"
                );
                Ok(failed)
            }
        }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    async fn drive_pipeline(&self, document: &Document) -> Result<Document, AppError> {
        let mut ctx = PipelineContext::new(
            document,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
        );

        let machine = ready();

        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = fetch_source(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let fetch_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = extract_text(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let extract_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = split_text(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let chunk_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = commit_chunks(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let commit_duration = stage_start.elapsed();

        let total_duration = pipeline_started.elapsed();
        let fetch_ms = Self::duration_millis(fetch_duration);
        let extract_ms = Self::duration_millis(extract_duration);
        let chunk_ms = Self::duration_millis(chunk_duration);
        let commit_ms = Self::duration_millis(commit_duration);
        debug!(
            document_id = %ctx.document_id,
            attempt = ctx.attempt,
            total_ms = Self::duration_millis(total_duration),
            fetch_ms,
            extract_ms,
            chunk_ms,
            commit_ms,
            "ingestion pipeline finished"
        );

        ctx.take_committed()
    }
}

#[cfg(test)]
mod tests;
