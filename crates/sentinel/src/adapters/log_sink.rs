// Rust guideline compliant 2026-02-16

//! `CollectSink` adapter (C2's "data_callback", §4.2): persists each flushed
//! chunk of `LogRecord`s, advances the batch registry, and saves the new
//! read offset — the three things §4.2 requires to happen atomically from
//! the collector's point of view before `on_batch` returns `true`.
//!
//! A batch is marked `COLLECTED` only once the collector has moved on to a
//! newer batch (`on_batch_changed`): the most recent 5-minute window is
//! deliberately left `COLLECTING` until then, since more lines for it may
//! still arrive on the next tail read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use batch_registry::BatchRegistry;
use chrono::{NaiveDate, Utc};
use domain::{BatchEntry, BatchId, BatchStatus, CollectSink, DocumentStore, LogRecord, OffsetRow, OffsetStore};

pub struct NginxCollectSink<L, B, O>
where
    L: DocumentStore<LogRecord>,
    B: DocumentStore<BatchEntry>,
    O: OffsetStore,
{
    log_store: L,
    registry: BatchRegistry<B>,
    offset_store: O,
    file_path: String,
    next_doc_id: AtomicU64,
    last_seen_batch: Mutex<Option<BatchId>>,
}

impl<L, B, O> NginxCollectSink<L, B, O>
where
    L: DocumentStore<LogRecord>,
    B: DocumentStore<BatchEntry>,
    O: OffsetStore,
{
    #[must_use]
    pub fn new(log_store: L, registry: BatchRegistry<B>, offset_store: O, file_path: impl Into<String>) -> Self {
        Self {
            log_store,
            registry,
            offset_store,
            file_path: file_path.into(),
            next_doc_id: AtomicU64::new(0),
            last_seen_batch: Mutex::new(None),
        }
    }
}

impl<L, B, O> CollectSink for NginxCollectSink<L, B, O>
where
    L: DocumentStore<LogRecord>,
    B: DocumentStore<BatchEntry>,
    O: OffsetStore,
{
    async fn on_batch(&self, records: Vec<LogRecord>, offset_after: u64) -> bool {
        let Some(batch_id) = records.first().map(|r| r.batch_id.clone()) else {
            return true;
        };
        let is_new_batch = {
            let mut last_seen = self.last_seen_batch.lock().expect("last-seen-batch mutex poisoned");
            let is_new = last_seen.as_ref() != Some(&batch_id);
            *last_seen = Some(batch_id.clone());
            is_new
        };
        if is_new_batch && self.registry.advance(&batch_id, BatchStatus::Collecting).await.is_err() {
            tracing::warn!(%batch_id, "could not open batch at COLLECTING, already past this stage");
        }

        let count = records.len() as u64;
        let docs = records
            .into_iter()
            .map(|record| {
                let id = self.next_doc_id.fetch_add(1, Ordering::Relaxed);
                (format!("{batch_id}_{id}"), record)
            })
            .collect();
        if self.log_store.batch_insert(docs).await.is_err() {
            tracing::error!(%batch_id, "failed to persist collected log records");
            return false;
        }

        let row = OffsetRow { file_path: self.file_path.clone(), offset: offset_after, update_time: Utc::now(), collect_date: Utc::now().date_naive(), count };
        if self.offset_store.save(row).await.is_err() {
            tracing::error!(%batch_id, "failed to persist collector offset");
            return false;
        }
        true
    }

    async fn on_date_changed(&self, _prior: NaiveDate, current: NaiveDate) {
        let index_name = format!("nginx_log_metadata_{}", current.format("%Y_%m_%d"));
        if let Err(error) = self.log_store.create_index(&index_name).await {
            tracing::warn!(%error, index_name, "failed to create daily log index");
        }
    }

    async fn on_batch_changed(&self, prior: BatchId, _current: BatchId) {
        if let Err(error) = self.registry.advance(&prior, BatchStatus::Collected).await {
            tracing::warn!(%error, %prior, "failed to close out prior batch at COLLECTED");
        }
    }
}
