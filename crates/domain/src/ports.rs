//! Hexagonal ports. Implementations live in the `sentinel` binary crate (or,
//! for tests, as in-crate mocks); every component crate here depends only on
//! these traits, never on a concrete adapter.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::aggregate::{AllowedIpSegment, CityInfo};
use crate::record::{BatchId, LogRecord};

// ---------------------------------------------------------------------------
// Offset store (C3)
// ---------------------------------------------------------------------------

/// Singleton row of `offset_config` (§3, §4.3, §6.4), keyed implicitly by the
/// fixed id `log_collect` — the port never takes an id, since there is only
/// ever one row.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetRow {
    pub file_path: String,
    pub offset: u64,
    pub update_time: DateTime<Utc>,
    pub collect_date: NaiveDate,
    pub count: u64,
}

impl OffsetRow {
    /// The "absent" reading `load()` returns when no row has ever been written.
    #[must_use]
    pub fn zero(file_path: impl Into<String>, collect_date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self { file_path: file_path.into(), offset: 0, update_time: now, collect_date, count: 0 }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum OffsetStoreError {
    #[error("offset store unavailable: {0}")]
    Unavailable(String),
}

#[expect(async_fn_in_trait, reason = "no dyn dispatch needed; internal workspace only")]
pub trait OffsetStore {
    /// Reads return the zero row if absent (§4.3).
    async fn load(&self) -> Result<OffsetRow, OffsetStoreError>;
    /// Must commit before the collector returns `true` from its data callback (§4.3).
    async fn save(&self, row: OffsetRow) -> Result<(), OffsetStoreError>;
}

// ---------------------------------------------------------------------------
// Document repository (C4)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum DocumentStoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("conflict on id {id} after {retries} retries")]
    Conflict { id: String, retries: u32 },
    #[error("document not found: {0}")]
    NotFound(String),
}

/// A narrow query shape: enough to express "all entries with this status" or
/// "all aggregates for this batch_id", without modeling a full search DSL
/// (the real query language is out of scope per §1).
#[derive(Debug, Clone, Default)]
pub struct DocQuery {
    pub term_eq: Option<(String, String)>,
    pub sort_ascending_by: Option<String>,
}

impl DocQuery {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self { term_eq: Some((field.into(), value.into())), sort_ascending_by: None }
    }

    #[must_use]
    pub fn sorted_by(mut self, field: impl Into<String>) -> Self {
        self.sort_ascending_by = Some(field.into());
        self
    }
}

/// Typed CRUD + bulk upsert + scroll-paged reads + daily-index lifecycle (§4.4).
///
/// `id` is always an externally-assigned business id (a `batch_id` or an IP).
#[expect(async_fn_in_trait, reason = "no dyn dispatch needed; internal workspace only")]
pub trait DocumentStore<T: Clone + Send> {
    /// Full iteration (scroll-paged in a real document store; §4.4).
    async fn get_all(&self, query: &DocQuery) -> Result<Vec<T>, DocumentStoreError>;
    /// Single-page search.
    async fn query_list(&self, query: &DocQuery) -> Result<Vec<T>, DocumentStoreError>;
    async fn get_by_id(&self, id: &str) -> Result<Option<T>, DocumentStoreError>;
    async fn delete_by_id(&self, id: &str) -> Result<(), DocumentStoreError>;
    /// Full-document upsert (`doc_as_upsert=true`, `retry_on_conflict=3`).
    async fn merge(&self, id: &str, doc: T) -> Result<(), DocumentStoreError>;
    /// Read-modify-write upsert: `seed` is used verbatim on first insert;
    /// `update` is applied to the existing document on every subsequent
    /// call. Models the summarizer's scripted upsert (§4.8) without
    /// embedding a script string, since there is no real document-store
    /// script engine to target.
    async fn upsert_with<F>(&self, id: &str, seed: T, update: F) -> Result<(), DocumentStoreError>
    where
        F: FnOnce(T) -> T + Send;
    /// Bulk index, chunked at 1000, fail-fast (§4.4).
    async fn batch_insert(&self, docs: Vec<(String, T)>) -> Result<(), DocumentStoreError>;
    /// Bulk upsert by id, chunked at 1000 (§4.4).
    async fn batch_merge(&self, docs: Vec<(String, T)>) -> Result<(), DocumentStoreError>;
    /// Idempotent create-if-absent for a daily index (§4.4, §4.11).
    async fn create_index(&self, name: &str) -> Result<(), DocumentStoreError>;
    /// Daily-index lifecycle support for C11 (§4.11).
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>, DocumentStoreError>;
    async fn drop_index(&self, name: &str) -> Result<(), DocumentStoreError>;
}

// ---------------------------------------------------------------------------
// Allowed-segment and GeoIP lookups (enrichment collaborators, §4.6)
// ---------------------------------------------------------------------------

#[expect(async_fn_in_trait, reason = "no dyn dispatch needed; internal workspace only")]
pub trait AllowedSegmentLookup {
    /// Range match (`start_ip <= ip <= end_ip`) against the allowed-segment index.
    async fn query_ips(
        &self,
        ips: &[String],
    ) -> Result<HashMap<String, AllowedIpSegment>, DocumentStoreError>;
}

#[expect(async_fn_in_trait, reason = "no dyn dispatch needed; internal workspace only")]
pub trait GeoIpLookup {
    /// `zh-CN` locale preferred when present, English fallback otherwise (§4.6).
    async fn query_cities(&self, ips: &[String]) -> Result<HashMap<String, CityInfo>, DocumentStoreError>;
}

// ---------------------------------------------------------------------------
// Collector sink (C2's "data_callback", §4.2)
// ---------------------------------------------------------------------------

/// The collector's sole durability boundary (§4.2): `on_batch` must persist
/// `records` and advance the offset store atomically from the caller's point
/// of view before returning `true`. Returning `false` is a `CallbackFailure`
/// (§7): fatal to the current run, offset left untouched.
#[expect(async_fn_in_trait, reason = "no dyn dispatch needed; internal workspace only")]
pub trait CollectSink {
    async fn on_batch(&self, records: Vec<LogRecord>, offset_after: u64) -> bool;

    /// Default no-op: most sinks only care about `on_batch`.
    async fn on_date_changed(&self, _prior: NaiveDate, _current: NaiveDate) {}

    /// Default no-op: most sinks only care about `on_batch`.
    async fn on_batch_changed(&self, _prior: BatchId, _current: BatchId) {}
}
