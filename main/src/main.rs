mod args;

use std::{path::Path, sync::Arc, time::Duration};

use bytes::Bytes;
use clap::Parser;
use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::{get_config, AppConfig},
};
use ingestion_pipeline::{
    Dispatcher, IngestionConfig, IngestionPipeline, IngestionService, SubmitRequest,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::args::{Cli, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;
    let service = build_service(&config).await?;

    match cli.command {
        Command::Ingest {
            paths,
            owner,
            course,
            mime,
        } => {
            let mut submitted = Vec::new();
            for path in &paths {
                match submit_path(&service, path, &owner, course.as_deref(), mime.as_deref()).await
                {
                    Ok(id) => submitted.push(id),
                    Err(err) => warn!(path = %path.display(), error = %err, "upload rejected"),
                }
            }

            service.drain().await;

            let mut reports = Vec::with_capacity(submitted.len());
            for id in &submitted {
                reports.push(service.get_status(id).await?);
            }
            print_json(&reports)?;
        }
        Command::Status { document_id } => {
            print_json(&service.get_status(&document_id).await?)?;
        }
        Command::Chunks { document_id, count } => {
            let chunks = service.get_chunks(&document_id).await?;
            if count {
                println!("{}", chunks.len());
            } else {
                print_json(&chunks)?;
            }
        }
        Command::Reprocess { document_id } => {
            service.reprocess(&document_id).await?;
            service.drain().await;
            print_json(&service.get_status(&document_id).await?)?;
        }
        Command::Delete { document_id } => {
            service.delete(&document_id).await?;
            info!(%document_id, "deleted");
        }
        Command::Stale { older_than_secs } => {
            let stale = service
                .stale_documents(older_than_secs.map(Duration::from_secs))
                .await?;
            print_json(&stale)?;
        }
    }

    Ok(())
}

async fn build_service(config: &AppConfig) -> Result<IngestionService, Box<dyn std::error::Error>> {
    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let storage = StorageManager::new(config).await?;

    let pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        openai_client,
        storage.clone(),
        IngestionConfig::from(config),
    )?);

    Ok(IngestionService::new(
        db,
        storage,
        Dispatcher::new(pipeline),
        Duration::from_secs(config.stale_processing_secs),
    ))
}

async fn submit_path(
    service: &IngestionService,
    path: &Path,
    owner: &str,
    course: Option<&str>,
    mime: Option<&str>,
) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mime_type = mime.map_or_else(
        || {
            mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        },
        str::to_string,
    );
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let id = service
        .submit(SubmitRequest {
            owner_id: owner.to_string(),
            course_id: course.map(str::to_string),
            file_name,
            mime_type,
            bytes: Bytes::from(bytes),
        })
        .await?;

    info!(path = %path.display(), document_id = %id, "submitted");
    Ok(id)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
