//! On-disk behavior of the `SQLite` vector store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use ragstudy::error::StoreError;
use ragstudy::store::{
    Embedder, HashEmbedder, SearchFilter, SqliteVectorStore, VectorStore, chunk_text,
};
use tempfile::TempDir;

#[tokio::test]
async fn documents_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("store.db");
    let embedder = HashEmbedder::default();

    {
        let store = SqliteVectorStore::open(&path, embedder.dimensions()).unwrap();
        let chunks = chunk_text(
            "The warranty covers parts for two years.\nLabor is covered for one year.",
            60,
        );
        let written = store
            .add_document("warranty", Some("Warranty"), &chunks, &embedder, None)
            .unwrap();
        assert_eq!(written, chunks.len());
    }

    let store = SqliteVectorStore::open(&path, embedder.dimensions()).unwrap();
    let filter = SearchFilter::now();
    assert_eq!(store.count(&filter).await.unwrap(), 2);

    let query = embedder.embed("How long are parts covered by the warranty?").unwrap();
    let hits = store.search(&query, 1, &filter).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].chunk.content.contains("parts"));
    assert_eq!(hits[0].chunk.source_name.as_deref(), Some("Warranty"));
}

#[test]
fn reopening_with_other_dimensions_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    drop(SqliteVectorStore::open(&path, 384).unwrap());

    let result = SqliteVectorStore::open(&path, 128);
    assert!(matches!(
        result,
        Err(StoreError::DimensionMismatch {
            expected: 384,
            actual: 128
        })
    ));
}
