use crate::error::AppError;

use super::types::{document::Document, document_chunk::DocumentChunk, StoredObject};
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

/// Message SurrealDB attaches to transactions aborted by a concurrent writer.
const TRANSACTION_CONFLICT_MARKER: &str = "Failed to commit transaction due to a read or write conflict";

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connects, signs in as root and selects the namespace and database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Embedded engines have no auth layer to sign in to
        let embedded = ["mem://", "rocksdb://", "surrealkv://"]
            .iter()
            .any(|scheme| address.starts_with(scheme));
        if !embedded {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.build_indexes().await?;
        Ok(())
    }

    pub async fn build_indexes(&self) -> Result<(), Error> {
        let document = Document::table_name();
        let chunk = DocumentChunk::table_name();

        self.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS idx_document_owner ON {document} FIELDS owner_id;
                 DEFINE INDEX IF NOT EXISTS idx_document_status ON {document} FIELDS status;
                 DEFINE INDEX IF NOT EXISTS idx_document_course ON {document} FIELDS course_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_document ON {chunk} FIELDS document_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_position ON {chunk} FIELDS document_id, chunk_index UNIQUE;"
            ))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

/// True when `err` came from a transaction that lost a write race.
pub fn is_transaction_conflict(err: &Error) -> bool {
    err.to_string().contains(TRANSACTION_CONFLICT_MARKER)
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// In-memory SurrealDB client for tests.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
