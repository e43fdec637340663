// Rust guideline compliant 2026-02-16

//! Blanket `DocumentStore<T>` forwarding for `Arc<D>`, so a single adapter
//! instance can be handed to several owners at once (the batch registry,
//! the collect sink, and each pipeline stage all need their own handle onto
//! the same underlying `BatchEntry`/`LogRecord` store). None of the port
//! traits in `domain` are implemented for `Arc<_>` directly, since the
//! teacher's own ports never needed sharing beyond a single `ConcurrentBuffer`
//! `Arc` passed by reference; this crate adds the forwarding impl it needs.

use std::sync::Arc;

use domain::{DocQuery, DocumentStore, DocumentStoreError};

impl<T, D> DocumentStore<T> for Arc<D>
where
    T: Clone + Send,
    D: DocumentStore<T>,
{
    async fn get_all(&self, query: &DocQuery) -> Result<Vec<T>, DocumentStoreError> {
        self.as_ref().get_all(query).await
    }
    async fn query_list(&self, query: &DocQuery) -> Result<Vec<T>, DocumentStoreError> {
        self.as_ref().query_list(query).await
    }
    async fn get_by_id(&self, id: &str) -> Result<Option<T>, DocumentStoreError> {
        self.as_ref().get_by_id(id).await
    }
    async fn delete_by_id(&self, id: &str) -> Result<(), DocumentStoreError> {
        self.as_ref().delete_by_id(id).await
    }
    async fn merge(&self, id: &str, doc: T) -> Result<(), DocumentStoreError> {
        self.as_ref().merge(id, doc).await
    }
    async fn upsert_with<F>(&self, id: &str, seed: T, update: F) -> Result<(), DocumentStoreError>
    where
        F: FnOnce(T) -> T + Send,
    {
        self.as_ref().upsert_with(id, seed, update).await
    }
    async fn batch_insert(&self, docs: Vec<(String, T)>) -> Result<(), DocumentStoreError> {
        self.as_ref().batch_insert(docs).await
    }
    async fn batch_merge(&self, docs: Vec<(String, T)>) -> Result<(), DocumentStoreError> {
        self.as_ref().batch_merge(docs).await
    }
    async fn create_index(&self, name: &str) -> Result<(), DocumentStoreError> {
        self.as_ref().create_index(name).await
    }
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>, DocumentStoreError> {
        self.as_ref().list_indices(prefix).await
    }
    async fn drop_index(&self, name: &str) -> Result<(), DocumentStoreError> {
        self.as_ref().drop_index(name).await
    }
}
