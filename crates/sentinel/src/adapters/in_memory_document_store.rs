// Rust guideline compliant 2026-02-16

//! In-process `DocumentStore<T>` adapter, backed by a `HashMap` behind a
//! `std::sync::Mutex`, grounded on `fraud_detection`'s
//! `adapters::in_memory_storage::InMemoryStorage` — the same "prove the port
//! is swappable with the simplest possible adapter" role, generalized from
//! one fixed document type to any `T: Clone + Send`.
//!
//! Index lifecycle (`create_index`/`list_indices`/`drop_index`) has no
//! analogue for a flat map, so it is modeled as a parallel set of known
//! index names rather than physically partitioning the map.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use domain::{DocQuery, DocumentStore, DocumentStoreError};

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore<T> {
    docs: Mutex<HashMap<String, T>>,
    indices: Mutex<HashSet<String>>,
}

impl<T> InMemoryDocumentStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { docs: Mutex::new(HashMap::new()), indices: Mutex::new(HashSet::new()) }
    }
}

impl<T: Clone + Send> DocumentStore<T> for InMemoryDocumentStore<T> {
    async fn get_all(&self, _query: &DocQuery) -> Result<Vec<T>, DocumentStoreError> {
        Ok(self.docs.lock().expect("document store mutex poisoned").values().cloned().collect())
    }

    async fn query_list(&self, query: &DocQuery) -> Result<Vec<T>, DocumentStoreError> {
        self.get_all(query).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<T>, DocumentStoreError> {
        Ok(self.docs.lock().expect("document store mutex poisoned").get(id).cloned())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), DocumentStoreError> {
        self.docs.lock().expect("document store mutex poisoned").remove(id);
        Ok(())
    }

    async fn merge(&self, id: &str, doc: T) -> Result<(), DocumentStoreError> {
        self.docs.lock().expect("document store mutex poisoned").insert(id.to_owned(), doc);
        Ok(())
    }

    async fn upsert_with<F>(&self, id: &str, seed: T, update: F) -> Result<(), DocumentStoreError>
    where
        F: FnOnce(T) -> T + Send,
    {
        let mut docs = self.docs.lock().expect("document store mutex poisoned");
        let existing = docs.get(id).cloned();
        let next = existing.map_or(seed, update);
        docs.insert(id.to_owned(), next);
        Ok(())
    }

    async fn batch_insert(&self, docs: Vec<(String, T)>) -> Result<(), DocumentStoreError> {
        let mut store = self.docs.lock().expect("document store mutex poisoned");
        for (id, doc) in docs {
            store.insert(id, doc);
        }
        Ok(())
    }

    async fn batch_merge(&self, docs: Vec<(String, T)>) -> Result<(), DocumentStoreError> {
        self.batch_insert(docs).await
    }

    async fn create_index(&self, name: &str) -> Result<(), DocumentStoreError> {
        self.indices.lock().expect("index set mutex poisoned").insert(name.to_owned());
        Ok(())
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>, DocumentStoreError> {
        Ok(self
            .indices
            .lock()
            .expect("index set mutex poisoned")
            .iter()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn drop_index(&self, name: &str) -> Result<(), DocumentStoreError> {
        self.indices.lock().expect("index set mutex poisoned").remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_document_by_id() {
        let store: InMemoryDocumentStore<String> = InMemoryDocumentStore::new();
        store.merge("a", "hello".to_owned()).await.unwrap();
        assert_eq!(store.get_by_id("a").await.unwrap(), Some("hello".to_owned()));
        store.delete_by_id("a").await.unwrap();
        assert_eq!(store.get_by_id("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_with_seeds_then_updates() {
        let store: InMemoryDocumentStore<i32> = InMemoryDocumentStore::new();
        store.upsert_with("x", 10, |prev| prev + 1).await.unwrap();
        assert_eq!(store.get_by_id("x").await.unwrap(), Some(10));
        store.upsert_with("x", 10, |prev| prev + 1).await.unwrap();
        assert_eq!(store.get_by_id("x").await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn index_lifecycle_tracks_known_names() {
        let store: InMemoryDocumentStore<String> = InMemoryDocumentStore::new();
        store.create_index("score_record_2024_06_01").await.unwrap();
        store.create_index("score_record_2024_06_02").await.unwrap();
        let listed = store.list_indices("score_record_").await.unwrap();
        assert_eq!(listed.len(), 2);
        store.drop_index("score_record_2024_06_01").await.unwrap();
        assert_eq!(store.list_indices("score_record_").await.unwrap().len(), 1);
    }
}
