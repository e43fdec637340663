// Rust guideline compliant 2026-02-16

//! Summarizer (C8): roll each batch's `ScoreRecord`s into the running
//! `IpSummary` per IP, grounded on
//! `core/scheduler/tasks/score_aggregator_task.py`'s `scripted_upsert` —
//! reimplemented here as a plain Rust closure against
//! [`domain::DocumentStore::upsert_with`] rather than a literal Painless
//! script string, since there is no real document-store script engine to
//! target (§4.8, §9).

use batch_registry::{BatchRegistry, BatchRegistryError};
use domain::{
    BatchEntry, BatchId, BatchStatus, DocQuery, DocumentStore, DocumentStoreError, IpSummary,
    ScoreRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
    #[error(transparent)]
    Registry(#[from] BatchRegistryError),
}

/// Reads `ScoreRecord`s, writes `IpSummary` rows.
#[derive(Debug)]
pub struct Summarizer<S, I>
where
    S: DocumentStore<ScoreRecord>,
    I: DocumentStore<IpSummary>,
{
    score_store: S,
    summary_store: I,
}

impl<S, I> Summarizer<S, I>
where
    S: DocumentStore<ScoreRecord>,
    I: DocumentStore<IpSummary>,
{
    #[must_use]
    pub fn new(score_store: S, summary_store: I) -> Self {
        Self { score_store, summary_store }
    }

    /// Run C8 over every batch currently `SCORED`, ascending: `SCORED` ->
    /// `SUMMARIZING` -> accumulate-merge -> `SUMMARIZED`. The source names
    /// this intermediate status `AGGREGATING` (a scheduler-task naming
    /// leftover — see `domain::BatchStatus::Summarizing`'s doc comment);
    /// this crate keeps the dedicated `Summarizing`/`Summarized` pair.
    ///
    /// # Errors
    ///
    /// Propagates the first [`SummarizerError`] encountered.
    pub async fn run_once<B: DocumentStore<BatchEntry>>(
        &self,
        registry: &BatchRegistry<B>,
    ) -> Result<usize, SummarizerError> {
        let batches = registry.get_all_by_status(BatchStatus::Scored).await?;
        let mut processed = 0;
        for entry in batches {
            registry.advance(&entry.batch_id, BatchStatus::Summarizing).await?;
            self.summarize_batch(&entry.batch_id).await?;
            registry.advance(&entry.batch_id, BatchStatus::Summarized).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Accumulate one batch's score records into their IPs' running
    /// summaries. `score_fixed`/`score_dynamic`/`score_feature` accumulate;
    /// `feature_tags`/`ip_enrich`/`last_update` overwrite — exactly the
    /// split the source's `build_script` encodes between its "累加型字段"
    /// (accumulating fields) and "覆盖型字段" (overwriting fields) comments.
    async fn summarize_batch(&self, batch_id: &BatchId) -> Result<(), SummarizerError> {
        let query = DocQuery::term("batch_id", batch_id.as_str());
        let score_records = self.score_store.get_all(&query).await?;
        let now = chrono::Utc::now();

        for record in score_records {
            let ip = record.ip.clone();
            let seed = IpSummary {
                ip: ip.clone(),
                score_fixed: record.score_fixed,
                score_dynamic: record.score_dynamic,
                score_feature: record.score_feature,
                feature_tags: feature_tags_of(&record),
                ip_enrich: record.ip_enrich.clone(),
                last_update: now,
            };
            let record_for_update = record.clone();
            self.summary_store
                .upsert_with(&ip, seed, move |existing| IpSummary {
                    ip: existing.ip,
                    score_fixed: existing.score_fixed + record_for_update.score_fixed,
                    score_dynamic: existing.score_dynamic + record_for_update.score_dynamic,
                    score_feature: existing.score_feature + record_for_update.score_feature,
                    feature_tags: feature_tags_of(&record_for_update),
                    ip_enrich: record_for_update.ip_enrich.clone(),
                    last_update: now,
                })
                .await?;
        }
        Ok(())
    }
}

/// Score rule names with a nonzero contribution become this IP's tags for
/// the batch — the overwriting counterpart of the accumulating score totals.
fn feature_tags_of(record: &ScoreRecord) -> Vec<String> {
    record
        .score_details
        .iter()
        .filter(|d| d.score != 0.0)
        .map(|d| d.score_rule_name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use domain::ScoreDetail;

    #[derive(Default)]
    struct MockScoreStore {
        data: Vec<ScoreRecord>,
    }

    impl DocumentStore<ScoreRecord> for MockScoreStore {
        async fn get_all(&self, query: &DocQuery) -> Result<Vec<ScoreRecord>, DocumentStoreError> {
            let Some((_, value)) = &query.term_eq else { return Ok(self.data.clone()) };
            Ok(self.data.iter().filter(|r| r.batch_id.as_str() == value).cloned().collect())
        }
        async fn query_list(&self, query: &DocQuery) -> Result<Vec<ScoreRecord>, DocumentStoreError> {
            self.get_all(query).await
        }
        async fn get_by_id(&self, _id: &str) -> Result<Option<ScoreRecord>, DocumentStoreError> {
            Ok(None)
        }
        async fn delete_by_id(&self, _id: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn merge(&self, _id: &str, _doc: ScoreRecord) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn upsert_with<F>(&self, _id: &str, seed: ScoreRecord, _update: F) -> Result<(), DocumentStoreError>
        where
            F: FnOnce(ScoreRecord) -> ScoreRecord + Send,
        {
            let _ = seed;
            Ok(())
        }
        async fn batch_insert(&self, _docs: Vec<(String, ScoreRecord)>) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn batch_merge(&self, _docs: Vec<(String, ScoreRecord)>) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn create_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn list_indices(&self, _prefix: &str) -> Result<Vec<String>, DocumentStoreError> {
            Ok(Vec::new())
        }
        async fn drop_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockSummaryStore {
        data: Mutex<HashMap<String, IpSummary>>,
    }

    impl DocumentStore<IpSummary> for MockSummaryStore {
        async fn get_all(&self, _query: &DocQuery) -> Result<Vec<IpSummary>, DocumentStoreError> {
            Ok(self.data.lock().unwrap().values().cloned().collect())
        }
        async fn query_list(&self, query: &DocQuery) -> Result<Vec<IpSummary>, DocumentStoreError> {
            self.get_all(query).await
        }
        async fn get_by_id(&self, id: &str) -> Result<Option<IpSummary>, DocumentStoreError> {
            Ok(self.data.lock().unwrap().get(id).cloned())
        }
        async fn delete_by_id(&self, id: &str) -> Result<(), DocumentStoreError> {
            self.data.lock().unwrap().remove(id);
            Ok(())
        }
        async fn merge(&self, id: &str, doc: IpSummary) -> Result<(), DocumentStoreError> {
            self.data.lock().unwrap().insert(id.to_owned(), doc);
            Ok(())
        }
        async fn upsert_with<F>(&self, id: &str, seed: IpSummary, update: F) -> Result<(), DocumentStoreError>
        where
            F: FnOnce(IpSummary) -> IpSummary + Send,
        {
            let mut data = self.data.lock().unwrap();
            let existing = data.get(id).cloned();
            let next = existing.map_or(seed, update);
            data.insert(id.to_owned(), next);
            Ok(())
        }
        async fn batch_insert(&self, docs: Vec<(String, IpSummary)>) -> Result<(), DocumentStoreError> {
            let mut data = self.data.lock().unwrap();
            for (id, doc) in docs {
                data.insert(id, doc);
            }
            Ok(())
        }
        async fn batch_merge(&self, docs: Vec<(String, IpSummary)>) -> Result<(), DocumentStoreError> {
            self.batch_insert(docs).await
        }
        async fn create_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn list_indices(&self, _prefix: &str) -> Result<Vec<String>, DocumentStoreError> {
            Ok(Vec::new())
        }
        async fn drop_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockBatchStore {
        data: Mutex<HashMap<String, BatchEntry>>,
    }

    impl DocumentStore<BatchEntry> for MockBatchStore {
        async fn get_all(&self, _query: &DocQuery) -> Result<Vec<BatchEntry>, DocumentStoreError> {
            Ok(self.data.lock().unwrap().values().cloned().collect())
        }
        async fn query_list(&self, query: &DocQuery) -> Result<Vec<BatchEntry>, DocumentStoreError> {
            self.get_all(query).await
        }
        async fn get_by_id(&self, id: &str) -> Result<Option<BatchEntry>, DocumentStoreError> {
            Ok(self.data.lock().unwrap().get(id).cloned())
        }
        async fn delete_by_id(&self, id: &str) -> Result<(), DocumentStoreError> {
            self.data.lock().unwrap().remove(id);
            Ok(())
        }
        async fn merge(&self, id: &str, doc: BatchEntry) -> Result<(), DocumentStoreError> {
            self.data.lock().unwrap().insert(id.to_owned(), doc);
            Ok(())
        }
        async fn upsert_with<F>(&self, id: &str, seed: BatchEntry, update: F) -> Result<(), DocumentStoreError>
        where
            F: FnOnce(BatchEntry) -> BatchEntry + Send,
        {
            let mut data = self.data.lock().unwrap();
            let existing = data.get(id).cloned();
            let next = existing.map_or(seed, update);
            data.insert(id.to_owned(), next);
            Ok(())
        }
        async fn batch_insert(&self, docs: Vec<(String, BatchEntry)>) -> Result<(), DocumentStoreError> {
            let mut data = self.data.lock().unwrap();
            for (id, doc) in docs {
                data.insert(id, doc);
            }
            Ok(())
        }
        async fn batch_merge(&self, docs: Vec<(String, BatchEntry)>) -> Result<(), DocumentStoreError> {
            self.batch_insert(docs).await
        }
        async fn create_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn list_indices(&self, _prefix: &str) -> Result<Vec<String>, DocumentStoreError> {
            Ok(Vec::new())
        }
        async fn drop_index(&self, _name: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
    }

    fn score(batch: &str, ip: &str, fixed: f64, dynamic: f64, rule: &str) -> ScoreRecord {
        ScoreRecord {
            batch_id: BatchId::new(batch),
            ip: ip.to_owned(),
            score_fixed: fixed,
            score_dynamic: dynamic,
            score_feature: 0.0,
            score_details: vec![ScoreDetail { score_rule_name: rule.to_owned(), score: fixed + dynamic, description: None }],
            ip_enrich: domain::IpEnrich::default(),
        }
    }

    #[tokio::test]
    async fn first_batch_seeds_the_summary() {
        let score_store = MockScoreStore { data: vec![score("b1", "1.2.3.4", 10.0, 0.0, "r1")] };
        let summarizer = Summarizer::new(score_store, MockSummaryStore::default());
        let registry = BatchRegistry::new(MockBatchStore::default());
        registry.advance(&BatchId::new("b1"), BatchStatus::Scored).await.unwrap();

        summarizer.run_once(&registry).await.unwrap();
        let summary = summarizer.summary_store.get_by_id("1.2.3.4").await.unwrap().unwrap();
        assert!((summary.score_fixed - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn second_batch_accumulates_scores_but_overwrites_tags() {
        let score_store =
            MockScoreStore { data: vec![score("b1", "1.2.3.4", 10.0, 0.0, "r1"), score("b2", "1.2.3.4", 5.0, 0.0, "r2")] };
        let summarizer = Summarizer::new(score_store, MockSummaryStore::default());
        let registry = BatchRegistry::new(MockBatchStore::default());
        registry.advance(&BatchId::new("b1"), BatchStatus::Scored).await.unwrap();
        registry.advance(&BatchId::new("b2"), BatchStatus::Scored).await.unwrap();

        summarizer.run_once(&registry).await.unwrap();
        let summary = summarizer.summary_store.get_by_id("1.2.3.4").await.unwrap().unwrap();
        assert!((summary.score_fixed - 15.0).abs() < 1e-9);
        assert_eq!(summary.feature_tags, vec!["r2".to_owned()]);
    }

    #[tokio::test]
    async fn ip_enrich_overwrites_to_the_latest_batchs_value() {
        let mut first = score("b1", "1.2.3.4", 10.0, 0.0, "r1");
        first.ip_enrich.country_code = Some("FR".to_owned());
        let mut second = score("b2", "1.2.3.4", 5.0, 0.0, "r2");
        second.ip_enrich.country_code = Some("DE".to_owned());

        let score_store = MockScoreStore { data: vec![first, second] };
        let summarizer = Summarizer::new(score_store, MockSummaryStore::default());
        let registry = BatchRegistry::new(MockBatchStore::default());
        registry.advance(&BatchId::new("b1"), BatchStatus::Scored).await.unwrap();
        registry.advance(&BatchId::new("b2"), BatchStatus::Scored).await.unwrap();

        summarizer.run_once(&registry).await.unwrap();
        let summary = summarizer.summary_store.get_by_id("1.2.3.4").await.unwrap().unwrap();
        assert_eq!(summary.ip_enrich.country_code.as_deref(), Some("DE"));
    }

    #[tokio::test]
    async fn batch_is_marked_summarized() {
        let score_store = MockScoreStore { data: vec![score("b1", "1.2.3.4", 1.0, 0.0, "r1")] };
        let summarizer = Summarizer::new(score_store, MockSummaryStore::default());
        let registry = BatchRegistry::new(MockBatchStore::default());
        registry.advance(&BatchId::new("b1"), BatchStatus::Scored).await.unwrap();

        summarizer.run_once(&registry).await.unwrap();
        let entries = registry.get_all_by_status(BatchStatus::Summarized).await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
