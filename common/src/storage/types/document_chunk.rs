use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    chunk_index: u32,
    content: String,
    metadata: serde_json::Value
});

impl DocumentChunk {
    pub fn new(
        document_id: String,
        chunk_index: u32,
        content: String,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            chunk_index,
            content,
            metadata,
        }
    }

    /// Chunks of a document in sequence order.
    pub async fn get_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<DocumentChunk>, AppError> {
        let chunks: Vec<DocumentChunk> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE document_id = $document_id
                 ORDER BY chunk_index ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;

        Ok(chunks)
    }

    pub async fn count_for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        #[derive(serde::Deserialize)]
        struct CountRow {
            count: usize,
        }

        let rows: Vec<CountRow> = db
            .client
            .query(
                "SELECT count() AS count FROM type::table($table)
                 WHERE document_id = $document_id
                 GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;

        Ok(rows.first().map_or(0, |row| row.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("in-memory surrealdb")
    }

    #[test]
    fn new_chunk_gets_fresh_id() {
        let a = DocumentChunk::new("doc".into(), 0, "alpha".into(), json!({}));
        let b = DocumentChunk::new("doc".into(), 0, "alpha".into(), json!({}));

        assert_ne!(a.id, b.id);
        assert_eq!(a.chunk_index, 0);
    }

    #[tokio::test]
    async fn chunks_come_back_in_index_order() {
        let db = memory_db().await;

        for index in [2u32, 0, 1] {
            let chunk = DocumentChunk::new(
                "doc-1".into(),
                index,
                format!("chunk {index}"),
                json!({ "byte_offset": index * 10 }),
            );
            db.store_item(chunk).await.expect("store");
        }
        db.store_item(DocumentChunk::new(
            "doc-2".into(),
            0,
            "other".into(),
            json!({}),
        ))
        .await
        .expect("store other");

        let chunks = DocumentChunk::get_by_document_id("doc-1", &db)
            .await
            .expect("fetch");
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["chunk 0", "chunk 1", "chunk 2"]);
        assert_eq!(chunks[1].metadata["byte_offset"], json!(10));

        assert_eq!(
            DocumentChunk::count_for_document("doc-1", &db)
                .await
                .expect("count"),
            3
        );
        assert_eq!(
            DocumentChunk::count_for_document("missing", &db)
                .await
                .expect("count"),
            0
        );
    }
}
