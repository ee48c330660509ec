use std::sync::Arc;

use common::{error::AppError, storage::types::document::Document};
use tokio_util::task::TaskTracker;
use tracing::{error, warn};

use crate::pipeline::IngestionPipeline;

/// Schedules pipeline runs on the Tokio runtime without blocking the caller.
///
/// Every spawned run is tracked so [`Dispatcher::drain`] can wait for in-flight work.
#[derive(Clone)]
pub struct Dispatcher {
    pipeline: Arc<IngestionPipeline>,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            pipeline,
            tracker: TaskTracker::new(),
        }
    }

    /// Claims and runs a freshly submitted document in the background.
    pub fn dispatch(&self, document_id: String) {
        let pipeline = Arc::clone(&self.pipeline);
        self.tracker.spawn(async move {
            let outcome = pipeline.process_document(&document_id).await;
            log_unpersisted(&document_id, outcome);
        });
    }

    /// Runs a document whose `PROCESSING` claim the caller already holds.
    pub fn dispatch_claimed(&self, document: Document) {
        let pipeline = Arc::clone(&self.pipeline);
        self.tracker.spawn(async move {
            let document_id = document.id.clone();
            let outcome = pipeline.run_claimed(document).await;
            log_unpersisted(&document_id, outcome);
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every run dispatched so far has finished.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

fn log_unpersisted(document_id: &str, outcome: Result<Document, AppError>) {
    match outcome {
        Ok(_) => {}
        // Another run owns or already finished the document, or it was deleted.
        Err(
            err @ (AppError::ConcurrencyConflict(_)
            | AppError::InvalidTransition(_)
            | AppError::NotFound(_)),
        ) => {
            warn!(%document_id, error = %err, "ingestion run skipped");
        }
        Err(err) => {
            error!(
                %document_id,
                error_code = err.code(),
                error = %err,
                "ingestion run outcome could not be persisted"
            );
        }
    }
}
