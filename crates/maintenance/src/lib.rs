// Rust guideline compliant 2026-02-16

//! Daily maintenance (C11, spec.md §4.11): drop daily indices older than
//! `record_keep_days` and prune stale `log_metadata_batch` registry rows.
//! No direct source grounding survived retrieval for this component (a gap
//! noted in `DESIGN.md`); the cutoff arithmetic follows §4.11's prose
//! exactly and the deletion mechanics reuse `DocumentStore`'s index
//! lifecycle methods already grounded on the teacher's document-store
//! adapter (§4.4).

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use domain::{BatchEntry, DocQuery, DocumentStore, DocumentStoreError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// `record_keep_days` from system config (default 7, §4.11).
    pub keep_days: u32,
    /// Daily-indexed prefixes to sweep, e.g. `nginx_log_metadata`,
    /// `access_ip_aggregation`, `score_record` (§6.3).
    pub daily_index_prefixes: Vec<String>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            keep_days: 7,
            daily_index_prefixes: vec![
                "nginx_log_metadata".to_owned(),
                "access_ip_aggregation".to_owned(),
                "score_record".to_owned(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub indices_dropped: Vec<String>,
    pub batch_entries_dropped: usize,
}

/// Drives C11 over a `DocumentStore<BatchEntry>` handle, which doubles as
/// the admin client for the index-lifecycle operations (`list_indices`,
/// `drop_index`) that live on the same trait (§4.4) regardless of which
/// document type a given store instance was opened for.
#[derive(Debug)]
pub struct Maintenance<D: DocumentStore<BatchEntry>> {
    store: D,
    config: MaintenanceConfig,
}

impl<D: DocumentStore<BatchEntry>> Maintenance<D> {
    #[must_use]
    pub fn new(store: D, config: MaintenanceConfig) -> Self {
        Self { store, config }
    }

    /// Drop every daily index older than `now - keep_days` and delete
    /// batch-registry rows whose `batch_id` lexicographically precedes
    /// `<cutoff_date>2359` (§4.11).
    ///
    /// # Errors
    ///
    /// Propagates the first [`MaintenanceError`] encountered; indices
    /// already dropped and batch rows already deleted before a later
    /// failure are not rolled back (this stage is naturally idempotent —
    /// re-running it after a partial failure only re-attempts work still
    /// left to do).
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, MaintenanceError> {
        let cutoff_date = now.date_naive() - TimeDelta::days(i64::from(self.config.keep_days));
        let mut report = MaintenanceReport::default();

        for prefix in &self.config.daily_index_prefixes {
            let indices = self.store.list_indices(prefix).await?;
            for index in indices {
                if let Some(date) = index_date(&index, prefix)
                    && date < cutoff_date
                {
                    self.store.drop_index(&index).await?;
                    report.indices_dropped.push(index);
                }
            }
        }

        let cutoff_batch_id = format!("{}2359", cutoff_date.format("%Y_%m_%d"));
        let all = self.store.get_all(&DocQuery::all()).await?;
        for entry in all {
            if entry.batch_id.as_str() < cutoff_batch_id.as_str() {
                self.store.delete_by_id(entry.batch_id.as_str()).await?;
                report.batch_entries_dropped += 1;
            }
        }

        tracing::info!(
            indices_dropped = report.indices_dropped.len(),
            batch_entries_dropped = report.batch_entries_dropped,
            "daily maintenance complete"
        );
        Ok(report)
    }
}

/// Parse the `%Y_%m_%d` suffix of `<prefix>_<date>` (§6.3's daily-index
/// naming). Returns `None` for an index name that doesn't match the
/// expected shape rather than erroring: an unrelated index sharing the
/// prefix should be left alone, not crash the sweep.
fn index_date(index_name: &str, prefix: &str) -> Option<NaiveDate> {
    let suffix = index_name.strip_prefix(prefix)?.strip_prefix('_')?;
    NaiveDate::parse_from_str(suffix, "%Y_%m_%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use domain::{BatchId, BatchStatus};

    #[derive(Default)]
    struct MockStore {
        batches: Mutex<HashMap<String, BatchEntry>>,
        indices: Mutex<Vec<String>>,
    }

    impl DocumentStore<BatchEntry> for MockStore {
        async fn get_all(&self, _query: &DocQuery) -> Result<Vec<BatchEntry>, DocumentStoreError> {
            Ok(self.batches.lock().unwrap().values().cloned().collect())
        }
        async fn query_list(&self, query: &DocQuery) -> Result<Vec<BatchEntry>, DocumentStoreError> {
            self.get_all(query).await
        }
        async fn get_by_id(&self, id: &str) -> Result<Option<BatchEntry>, DocumentStoreError> {
            Ok(self.batches.lock().unwrap().get(id).cloned())
        }
        async fn delete_by_id(&self, id: &str) -> Result<(), DocumentStoreError> {
            self.batches.lock().unwrap().remove(id);
            Ok(())
        }
        async fn merge(&self, id: &str, doc: BatchEntry) -> Result<(), DocumentStoreError> {
            self.batches.lock().unwrap().insert(id.to_owned(), doc);
            Ok(())
        }
        async fn upsert_with<F>(&self, id: &str, seed: BatchEntry, update: F) -> Result<(), DocumentStoreError>
        where
            F: FnOnce(BatchEntry) -> BatchEntry + Send,
        {
            let mut data = self.batches.lock().unwrap();
            let existing = data.get(id).cloned();
            let next = existing.map_or(seed, update);
            data.insert(id.to_owned(), next);
            Ok(())
        }
        async fn batch_insert(&self, docs: Vec<(String, BatchEntry)>) -> Result<(), DocumentStoreError> {
            let mut data = self.batches.lock().unwrap();
            for (id, doc) in docs {
                data.insert(id, doc);
            }
            Ok(())
        }
        async fn batch_merge(&self, docs: Vec<(String, BatchEntry)>) -> Result<(), DocumentStoreError> {
            self.batch_insert(docs).await
        }
        async fn create_index(&self, name: &str) -> Result<(), DocumentStoreError> {
            self.indices.lock().unwrap().push(name.to_owned());
            Ok(())
        }
        async fn list_indices(&self, prefix: &str) -> Result<Vec<String>, DocumentStoreError> {
            Ok(self.indices.lock().unwrap().iter().filter(|i| i.starts_with(prefix)).cloned().collect())
        }
        async fn drop_index(&self, name: &str) -> Result<(), DocumentStoreError> {
            self.indices.lock().unwrap().retain(|i| i != name);
            Ok(())
        }
    }

    fn config() -> MaintenanceConfig {
        MaintenanceConfig { keep_days: 7, daily_index_prefixes: vec!["access_ip_aggregation".to_owned()] }
    }

    #[tokio::test]
    async fn drops_indices_older_than_keep_days() {
        let store = MockStore::default();
        store.create_index("access_ip_aggregation_2024_01_01").await.unwrap();
        store.create_index("access_ip_aggregation_2024_06_01").await.unwrap();
        let maintenance = Maintenance::new(store, config());

        let now = DateTime::parse_from_rfc3339("2024-06-10T00:00:00Z").unwrap().with_timezone(&Utc);
        let report = maintenance.run_once(now).await.unwrap();
        assert_eq!(report.indices_dropped, vec!["access_ip_aggregation_2024_01_01".to_owned()]);
    }

    #[tokio::test]
    async fn unmatched_index_name_is_left_alone() {
        let store = MockStore::default();
        store.create_index("access_ip_aggregation_not_a_date").await.unwrap();
        let maintenance = Maintenance::new(store, config());
        let now = DateTime::parse_from_rfc3339("2024-06-10T00:00:00Z").unwrap().with_timezone(&Utc);
        let report = maintenance.run_once(now).await.unwrap();
        assert!(report.indices_dropped.is_empty());
    }

    #[tokio::test]
    async fn prunes_stale_batch_registry_rows() {
        let store = MockStore::default();
        store
            .batches
            .lock()
            .unwrap()
            .insert("2024_01_010000".to_owned(), BatchEntry { batch_id: BatchId::new("2024_01_010000"), status: BatchStatus::Summarized });
        store
            .batches
            .lock()
            .unwrap()
            .insert("2024_06_091200".to_owned(), BatchEntry { batch_id: BatchId::new("2024_06_091200"), status: BatchStatus::Summarized });
        let maintenance = Maintenance::new(store, config());

        let now = DateTime::parse_from_rfc3339("2024-06-10T00:00:00Z").unwrap().with_timezone(&Utc);
        let report = maintenance.run_once(now).await.unwrap();
        assert_eq!(report.batch_entries_dropped, 1);
        let remaining = maintenance.store.get_all(&DocQuery::all()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].batch_id.as_str(), "2024_06_091200");
    }
}
