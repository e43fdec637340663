// Rust guideline compliant 2026-02-16

//! Shared domain types and hexagonal ports for the Sentinel pipeline.
//!
//! Every component crate (`log_parser`, `collector`, `batch_registry`,
//! `aggregator`, `score_engine`, `summarizer`, `scheduler`,
//! `adaptive_controller`, `maintenance`) depends on this crate and on this
//! crate alone; concrete adapters for the port traits live in the `sentinel`
//! binary crate.

mod record;
mod batch;
mod aggregate;
mod score;
mod ports;
mod task_scheduler;

pub use record::{BatchId, LogRecord};
pub use batch::{BatchEntry, BatchStatus};
pub use aggregate::{
    AccessIpAggregation, AllowedIpSegment, BehaviorVector, CityInfo, ExtendedStats, IpEnrich,
    KeyValue,
};
pub use score::{FeatureValue, IpSummary, ScoreDetail, ScoreRecord, ScoreRule, ScoreType};
pub use ports::{
    AllowedSegmentLookup, CollectSink, DocQuery, DocumentStore, DocumentStoreError, GeoIpLookup,
    OffsetRow, OffsetStore, OffsetStoreError,
};
pub use task_scheduler::{TaskRunStatus, TaskScheduler};
