use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Ingest course documents into searchable chunks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Submit files and wait for their ingestion runs to finish
    Ingest {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Owning user id
        #[arg(long, env = "DOCINGEST_OWNER")]
        owner: String,

        /// Course the documents belong to
        #[arg(long)]
        course: Option<String>,

        /// Declared mime type; guessed from the file extension when omitted
        #[arg(long)]
        mime: Option<String>,
    },

    /// Show the status of a document
    Status { document_id: String },

    /// Print the chunks of a document in order
    Chunks {
        document_id: String,

        /// Only print the number of chunks
        #[arg(long)]
        count: bool,
    },

    /// Restart processing of a document and wait for the outcome
    Reprocess { document_id: String },

    /// Delete a document, its chunks and its stored bytes
    Delete { document_id: String },

    /// List documents stuck in PROCESSING
    Stale {
        /// Threshold in seconds; defaults to `stale_processing_secs`
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}
