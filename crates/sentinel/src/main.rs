// Rust guideline compliant 2026-02-16

//! Sentinel entry point: wires the four-stage conveyor (COLLECT ->
//! AGGREGATE -> SCORE -> SUMMARIZE) plus the C9 scheduler and C11
//! maintenance sweep together, grounded on `fraud_detection`'s
//! `main_sqlite.rs` — same `tracing_subscriber` init, `anyhow::Context`
//! error wiring, and `tokio::select!` race against `ctrl_c` for graceful
//! shutdown, generalized from a three-stage `tokio::join!` pipeline to a
//! cron-scheduled task registry (§4.9, §6.5).

mod adapters;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, SystemTime};

use adapters::allowed_segment_lookup::InMemoryAllowedSegmentLookup;
use adapters::geoip_lookup::MaxMindGeoIpLookup;
use adapters::in_memory_document_store::InMemoryDocumentStore;
use adapters::log_sink::NginxCollectSink;
use adapters::sqlite_offset_store::SqliteOffsetStore;
use aggregator::Aggregator;
use anyhow::Context as _;
use batch_registry::BatchRegistry;
use clap::Parser as _;
use collector::{Collector, CollectorConfig};
use domain::{
    AccessIpAggregation, BatchEntry, IpSummary, LogRecord, OffsetRow, ScoreRecord, ScoreRule, ScoreType,
    TaskScheduler,
};
use maintenance::{Maintenance, MaintenanceConfig};
use scheduler::{Scheduler, Task};
use score_engine::ScoreEngine;
use sentinel_config::{Args, SentinelConfig};
use summarizer::Summarizer;
use tracing::Instrument as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = SentinelConfig::load(&args.config).context("failed to load configuration")?;

    let log_store: Arc<InMemoryDocumentStore<LogRecord>> = Arc::new(InMemoryDocumentStore::new());
    let batch_store: Arc<InMemoryDocumentStore<BatchEntry>> = Arc::new(InMemoryDocumentStore::new());
    let agg_store: Arc<InMemoryDocumentStore<AccessIpAggregation>> = Arc::new(InMemoryDocumentStore::new());
    let score_store: Arc<InMemoryDocumentStore<ScoreRecord>> = Arc::new(InMemoryDocumentStore::new());
    let summary_store: Arc<InMemoryDocumentStore<IpSummary>> = Arc::new(InMemoryDocumentStore::new());
    let task_store: InMemoryDocumentStore<TaskScheduler> = InMemoryDocumentStore::new();

    let offset_store = SqliteOffsetStore::new(&config.database.url)
        .await
        .context("failed to open offset store database")?;

    let segments = InMemoryAllowedSegmentLookup::new(Vec::new());
    let geo = open_geoip_lookup(&config.geoip.data_path);

    let aggregator = Aggregator::new(log_store.clone(), agg_store.clone(), segments, geo);
    let score_engine = ScoreEngine::new(default_score_rules()).context("failed to compile default score rules")?;
    let summarizer = Summarizer::new(score_store.clone(), summary_store.clone());
    let maintenance = Maintenance::new(batch_store.clone(), MaintenanceConfig { keep_days: config.record_keep_days, ..MaintenanceConfig::default() });

    bootstrap_task_configs(&task_store).await.context("failed to seed scheduler task configuration")?;

    let tasks: Vec<Box<dyn Task>> = vec![
        Box::new(AggregateTask { aggregator, batch_store: batch_store.clone() }),
        Box::new(ScoreTask { score_engine, batch_store: batch_store.clone(), agg_store: agg_store.clone(), score_store: score_store.clone() }),
        Box::new(SummarizeTask { summarizer, batch_store: batch_store.clone() }),
        Box::new(MaintenanceTask { maintenance }),
    ];
    let scheduler = Scheduler::new(tasks, task_store);

    let stop = Arc::new(AtomicBool::new(false));
    let collector_handle = tokio::spawn(run_collector_loop(
        log_store,
        batch_store,
        offset_store,
        config.nginx.log_path.clone(),
        Arc::clone(&stop),
    ));
    let scheduler_handle = tokio::spawn(run_scheduler_loop(scheduler, Arc::clone(&stop)));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("sentinel.shutdown: ctrl_c received, stopping collector and scheduler");
            stop.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    }

    let _ = collector_handle.await;
    let _ = scheduler_handle.await;
    Ok(())
}

fn open_geoip_lookup(data_path: &str) -> MaxMindGeoIpLookup {
    MaxMindGeoIpLookup::open(data_path).unwrap_or_else(|error| {
        panic!("GeoIP database unavailable at {data_path:?} ({error}); provide a valid geoip.data_path in the config")
    })
}

/// Built-in scoring rules seeded at startup (§4.7 config note: a real
/// deployment manages the `score_rule` index at runtime; this binary ships
/// a minimal sensible default instead of a document-store-backed loader).
fn default_score_rules() -> Vec<ScoreRule> {
    vec![
        ScoreRule {
            rule_name: "suspicious_user_agent".to_owned(),
            score_type: ScoreType::Fixed,
            condition: "suspicious_flag".to_owned(),
            formula: "20".to_owned(),
            description: Some("User agent matches a known scripting/bot signature".to_owned()),
            enabled: true,
        },
        ScoreRule {
            rule_name: "high_request_rate".to_owned(),
            score_type: ScoreType::Dynamic,
            condition: "count > 200".to_owned(),
            formula: "count / 20".to_owned(),
            description: Some("Unusually high request volume from a single IP in one window".to_owned()),
            enabled: true,
        },
        ScoreRule {
            rule_name: "not_allow_listed_error_heavy".to_owned(),
            score_type: ScoreType::Feature,
            condition: "allowed == 0 and status_4xx_ratio > 0.5".to_owned(),
            formula: "status_4xx_ratio * 10".to_owned(),
            description: Some("Non-allow-listed IP with a majority of 4xx responses".to_owned()),
            enabled: true,
        },
    ]
}

async fn bootstrap_task_configs(task_store: &InMemoryDocumentStore<TaskScheduler>) -> Result<(), domain::DocumentStoreError> {
    use domain::DocumentStore as _;
    let defaults = [
        ("aggregate_task", "0 * * * * * *"),
        ("score_task", "0 * * * * * *"),
        ("summarize_task", "0 * * * * * *"),
        ("maintenance_task", "0 0 3 * * * *"),
    ];
    for (task_id, cron) in defaults {
        if task_store.get_by_id(task_id).await?.is_none() {
            task_store.merge(task_id, TaskScheduler::new(task_id, cron)).await?;
        }
    }
    Ok(())
}

type SharedStore<T> = Arc<InMemoryDocumentStore<T>>;

struct AggregateTask<Seg: domain::AllowedSegmentLookup, Geo: domain::GeoIpLookup> {
    aggregator: Aggregator<SharedStore<LogRecord>, SharedStore<AccessIpAggregation>, Seg, Geo>,
    batch_store: SharedStore<BatchEntry>,
}

#[async_trait::async_trait]
impl<Seg, Geo> Task for AggregateTask<Seg, Geo>
where
    Seg: domain::AllowedSegmentLookup + Send + Sync,
    Geo: domain::GeoIpLookup + Send + Sync,
{
    fn task_id(&self) -> &str {
        "aggregate_task"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let registry = BatchRegistry::new(self.batch_store.clone());
        let processed = self.aggregator.run_once(&registry).await.context("aggregation failed")?;
        tracing::debug!(processed, "aggregate_task tick complete");
        Ok(())
    }
}

struct ScoreTask {
    score_engine: ScoreEngine,
    batch_store: SharedStore<BatchEntry>,
    agg_store: SharedStore<AccessIpAggregation>,
    score_store: SharedStore<ScoreRecord>,
}

#[async_trait::async_trait]
impl Task for ScoreTask {
    fn task_id(&self) -> &str {
        "score_task"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let registry = BatchRegistry::new(self.batch_store.clone());
        let processed = self
            .score_engine
            .run_once(&registry, &self.agg_store, &self.score_store)
            .await
            .context("scoring failed")?;
        tracing::debug!(processed, "score_task tick complete");
        Ok(())
    }
}

struct SummarizeTask {
    summarizer: Summarizer<SharedStore<ScoreRecord>, SharedStore<IpSummary>>,
    batch_store: SharedStore<BatchEntry>,
}

#[async_trait::async_trait]
impl Task for SummarizeTask {
    fn task_id(&self) -> &str {
        "summarize_task"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let registry = BatchRegistry::new(self.batch_store.clone());
        let processed = self.summarizer.run_once(&registry).await.context("summarization failed")?;
        tracing::debug!(processed, "summarize_task tick complete");
        Ok(())
    }
}

struct MaintenanceTask {
    maintenance: Maintenance<SharedStore<BatchEntry>>,
}

#[async_trait::async_trait]
impl Task for MaintenanceTask {
    fn task_id(&self) -> &str {
        "maintenance_task"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let report = self.maintenance.run_once(chrono::Utc::now()).await.context("maintenance sweep failed")?;
        tracing::info!(
            indices_dropped = report.indices_dropped.len(),
            batch_entries_dropped = report.batch_entries_dropped,
            "maintenance_task tick complete"
        );
        Ok(())
    }
}

/// Drive the C9 scheduler on a one-second cadence, matching `cron`'s
/// second-level granularity (§4.9).
async fn run_scheduler_loop<S: domain::DocumentStore<TaskScheduler>>(scheduler: Scheduler<S>, stop: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
        interval.tick().await;
        if let Err(error) = scheduler.tick(chrono::Utc::now()).await {
            tracing::error!(%error, "scheduler tick failed");
        }
    }
}

/// Tail the active file resolved from `log_path_template` forever, adapting
/// the poll interval/duration via the C10 controller (§4.2, §4.10), until
/// `stop` flips.
async fn run_collector_loop<L, B, O>(
    log_store: L,
    batch_store: B,
    offset_store: O,
    log_path_template: String,
    stop: Arc<AtomicBool>,
) where
    L: domain::DocumentStore<LogRecord> + Clone,
    B: domain::DocumentStore<BatchEntry> + Clone,
    O: domain::OffsetStore + Clone,
{
    let mut controller = adaptive_controller::AdaptiveController::load(
        adaptive_controller::AdaptiveControllerConfig::default(),
        now_since_epoch(),
    );
    let collector = Collector::new(CollectorConfig::builder().build().expect("default collector config is valid"));
    let mut current_path: Option<String> = None;

    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
        let state = controller.state();
        let active_path = resolve_active_path(&log_path_template, chrono::Utc::now());

        match &current_path {
            None => current_path = Some(active_path.clone()),
            Some(prior_path) if *prior_path != active_path => {
                let prior_path = prior_path.clone();
                tracing::info!(prior_path, active_path, "log path rotated, draining prior file");
                drain_rotated_file(&collector, &log_store, &batch_store, &offset_store, &prior_path, &active_path)
                    .await;
                current_path = Some(active_path.clone());
            }
            Some(_) => {}
        }

        let starting_offset = match offset_store.load().await {
            Ok(row) => row.offset,
            Err(error) => {
                tracing::error!(%error, "failed to load collector offset, starting from zero");
                0
            }
        };

        let registry = BatchRegistry::new(batch_store.clone());
        let sink = NginxCollectSink::new(log_store.clone(), registry, offset_store.clone(), active_path.clone());
        match collector
            .run(&sink, &active_path, starting_offset, &AtomicBool::new(false))
            .instrument(tracing::info_span!("collector"))
            .await
        {
            Ok(outcome) => {
                let file_size = std::fs::metadata(&active_path).map(|m| m.len()).unwrap_or(outcome.final_offset);
                if let Err(error) = controller.adjust(file_size, outcome.final_offset, now_since_epoch()) {
                    tracing::warn!(%error, "adaptive controller state persist failed");
                }
            }
            Err(error) => tracing::error!(%error, log_path = active_path, "collector run failed"),
        }

        tokio::time::sleep(Duration::from_secs(state.interval)).await;
    }
}

/// Drain `prior_path` from its last persisted offset to EOF, then reset the
/// offset store to `(next_path, 0)` (§4.2 Rotation, S3). The offset is only
/// reset once the drain's data callback has actually fired, so a failed
/// drain leaves the old offset in place for the next tick to retry.
async fn drain_rotated_file<L, B, O>(
    collector: &Collector,
    log_store: &L,
    batch_store: &B,
    offset_store: &O,
    prior_path: &str,
    next_path: &str,
) where
    L: domain::DocumentStore<LogRecord> + Clone,
    B: domain::DocumentStore<BatchEntry> + Clone,
    O: domain::OffsetStore + Clone,
{
    let drain_offset = match offset_store.load().await {
        Ok(row) => row.offset,
        Err(error) => {
            tracing::error!(%error, prior_path, "failed to load offset before rotation drain");
            0
        }
    };
    let registry = BatchRegistry::new(batch_store.clone());
    let sink = NginxCollectSink::new(log_store.clone(), registry, offset_store.clone(), prior_path.to_owned());
    match collector
        .run(&sink, prior_path, drain_offset, &AtomicBool::new(false))
        .instrument(tracing::info_span!("collector_rotation_drain"))
        .await
    {
        Ok(_) => {
            let reset_row = OffsetRow {
                file_path: next_path.to_owned(),
                offset: 0,
                update_time: chrono::Utc::now(),
                collect_date: chrono::Utc::now().date_naive(),
                count: 0,
            };
            if let Err(error) = offset_store.save(reset_row).await {
                tracing::error!(%error, next_path, "failed to reset offset after rotation");
            }
        }
        Err(error) => tracing::error!(%error, prior_path, "failed to drain rotated-out file"),
    }
}

/// Expand the one `${fmt}` `strftime` placeholder in `template` against
/// `now` (§6.2). A template with no placeholder is returned unchanged.
fn resolve_active_path(template: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    let Some(start) = template.find("${") else { return template.to_owned() };
    let Some(end_rel) = template[start + 2..].find('}') else { return template.to_owned() };
    let end = start + 2 + end_rel;
    let pattern = &template[start + 2..end];
    let expanded = now.format(pattern).to_string();
    format!("{}{}{}", &template[..start], expanded, &template[end + 1..])
}

fn now_since_epoch() -> Duration {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_with_no_placeholder_is_unchanged() {
        let now = chrono::DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z").unwrap().with_timezone(&chrono::Utc);
        assert_eq!(resolve_active_path("/var/log/nginx/access.log", now), "/var/log/nginx/access.log");
    }

    #[test]
    fn template_placeholder_expands_against_now() {
        let now = chrono::DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z").unwrap().with_timezone(&chrono::Utc);
        let resolved = resolve_active_path("/var/log/nginx/access-${%Y-%m-%d}.log", now);
        assert_eq!(resolved, "/var/log/nginx/access-2024-06-01.log");
    }
}
