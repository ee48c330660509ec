use common::{error::AppError, storage::types::document_chunk::DocumentChunk};
use serde_json::json;
use state_machines::core::GuardError;
use tracing::{debug, info, instrument};

use super::{
    context::PipelineContext,
    state::{Chunked, Committed, Extracted, Fetched, IngestionMachine, Ready},
};

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.document_id, run_id = %ctx.run_id, attempt = ctx.attempt)
)]
pub async fn fetch_source(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Fetched>, AppError> {
    let bytes = ctx.services.fetch_source(ctx.document).await?;

    info!(
        document_id = %ctx.document_id,
        attempt = ctx.attempt,
        owner_id = %ctx.document.owner_id,
        mime_type = %ctx.document.mime_type,
        size_bytes = bytes.len(),
        "ingestion source fetched"
    );

    ctx.source = Some(bytes);

    machine
        .fetch()
        .map_err(|(_, guard)| map_guard_error("fetch", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.document_id, run_id = %ctx.run_id, attempt = ctx.attempt)
)]
pub async fn extract_text(
    machine: IngestionMachine<(), Fetched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Extracted>, AppError> {
    let bytes = ctx.take_source()?;
    let extracted = ctx
        .services
        .extract_text(bytes, ctx.document.format)
        .await?;

    let text_len = extracted.text.chars().count();
    let preview: String = extracted
        .text
        .chars()
        .take(ctx.pipeline_config.tuning.preview_chars)
        .collect();
    let preview_clean = preview.replace('\n', " ");

    debug!(
        document_id = %ctx.document_id,
        attempt = ctx.attempt,
        extractor = extracted.extractor,
        text_chars = text_len,
        preview = %preview_clean,
        preview_truncated = text_len > preview.chars().count(),
        "ingestion text extracted"
    );

    ctx.extracted = Some(extracted);

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.document_id, run_id = %ctx.run_id, attempt = ctx.attempt)
)]
pub async fn split_text(
    machine: IngestionMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    let fragments = ctx.services.split_text(&ctx.extracted()?.text).await?;

    if fragments.is_empty() {
        return Err(AppError::Chunking(
            "chunker returned no fragments".to_string(),
        ));
    }

    debug!(
        document_id = %ctx.document_id,
        attempt = ctx.attempt,
        fragment_count = fragments.len(),
        "ingestion text split"
    );

    ctx.fragments = fragments;

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.document_id, run_id = %ctx.run_id, attempt = ctx.attempt)
)]
pub async fn commit_chunks(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Committed>, AppError> {
    let extractor = ctx.extracted()?.extractor;
    let chunks: Vec<DocumentChunk> = std::mem::take(&mut ctx.fragments)
        .into_iter()
        .map(|fragment| {
            let metadata = json!({
                "byte_offset": fragment.byte_offset,
                "char_count": fragment.char_count(),
                "mime_type": ctx.document.mime_type,
                "extractor": extractor,
            });
            DocumentChunk::new(
                ctx.document_id.clone(),
                fragment.index,
                fragment.content,
                metadata,
            )
        })
        .collect();
    let chunk_count = chunks.len();

    let completed = ctx.document.complete_with_chunks(chunks, ctx.db).await?;

    debug!(
        document_id = %ctx.document_id,
        attempt = ctx.attempt,
        chunk_count,
        "ingestion chunks committed"
    );

    ctx.committed = Some(completed);

    machine
        .commit()
        .map_err(|(_, guard)| map_guard_error("commit", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
