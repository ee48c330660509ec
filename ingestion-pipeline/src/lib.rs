#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod dispatcher;
pub mod pipeline;
pub mod service;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use dispatcher::Dispatcher;
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning};
pub use service::{DocumentStatusReport, IngestionService, SubmitRequest};
