// Rust guideline compliant 2026-02-16

//! Aggregator (C6).
//!
//! For each batch in `COLLECTED`, runs a composite `ip`-grouped aggregation
//! over that batch's log records, enriches with allowed-segment and GeoIP
//! data, computes the 35-dimension behavior vector (§4.6 — see
//! `domain::BehaviorVector` doc comment for why 35, not the spec's stated
//! 31), and upserts one `AccessIpAggregation` per IP.

use std::collections::HashMap;
use std::net::IpAddr;

use batch_registry::{BatchRegistry, BatchRegistryError};
use domain::{
    AccessIpAggregation, AllowedSegmentLookup, BatchEntry, BatchId, BatchStatus, BehaviorVector,
    DocQuery, DocumentStore, DocumentStoreError, ExtendedStats, GeoIpLookup, IpEnrich, KeyValue,
    LogRecord,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum AggregatorError {
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
    #[error(transparent)]
    Registry(#[from] BatchRegistryError),
}

const SUSPICIOUS_UA_KEYWORDS: &[&str] = &[
    "HeadlessChrome",
    "PhantomJS",
    "Python",
    "curl",
    "Java/",
    "Go-http-client",
    "Dalvik",
    "okhttp",
];

#[derive(Debug)]
pub struct Aggregator<L, A, Seg, Geo>
where
    L: DocumentStore<LogRecord>,
    A: DocumentStore<AccessIpAggregation>,
    Seg: AllowedSegmentLookup,
    Geo: GeoIpLookup,
{
    log_store: L,
    agg_store: A,
    segments: Seg,
    geo: Geo,
}

impl<L, A, Seg, Geo> Aggregator<L, A, Seg, Geo>
where
    L: DocumentStore<LogRecord>,
    A: DocumentStore<AccessIpAggregation>,
    Seg: AllowedSegmentLookup,
    Geo: GeoIpLookup,
{
    #[must_use]
    pub fn new(log_store: L, agg_store: A, segments: Seg, geo: Geo) -> Self {
        Self { log_store, agg_store, segments, geo }
    }

    /// Run C6 over every batch currently `COLLECTED`, ascending, exactly as
    /// §4.6 describes: mark `AGGREGATING`, compute, upsert, mark `AGGREGATED`.
    ///
    /// # Errors
    ///
    /// Propagates the first [`AggregatorError`] encountered; batches already
    /// marked `AGGREGATED` before the failure are not rolled back — the
    /// caller's scheduler wrapper will retry the failed one on its next tick
    /// (§7 `StageTransient`).
    pub async fn run_once<D: DocumentStore<BatchEntry>>(
        &self,
        registry: &BatchRegistry<D>,
    ) -> Result<usize, AggregatorError> {
        let batches = registry.get_all_by_status(BatchStatus::Collected).await?;
        let mut processed = 0;
        for entry in batches {
            registry.advance(&entry.batch_id, BatchStatus::Aggregating).await?;
            self.aggregate_batch(&entry.batch_id).await?;
            registry.advance(&entry.batch_id, BatchStatus::Aggregated).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Compute and persist every per-IP aggregate for one batch. Re-runnable:
    /// running it twice for the same `batch_id` produces the same documents,
    /// since ids are deterministic `(batch_id, ip)` pairs and the store
    /// upserts (property 4, §8).
    ///
    /// # Errors
    ///
    /// Propagates [`DocumentStoreError`] from either store.
    pub async fn aggregate_batch(&self, batch_id: &BatchId) -> Result<usize, AggregatorError> {
        let query = DocQuery::term("batch_id", batch_id.as_str());
        let records = self.log_store.get_all(&query).await?;

        let mut by_ip: HashMap<IpAddr, Vec<&LogRecord>> = HashMap::new();
        for record in &records {
            by_ip.entry(record.remote_addr).or_default().push(record);
        }

        let ips: Vec<String> = by_ip.keys().map(IpAddr::to_string).collect();
        let segments = self.segments.query_ips(&ips).await?;
        let cities = self.geo.query_cities(&ips).await?;

        let mut docs = Vec::with_capacity(by_ip.len());
        for (ip, ip_records) in &by_ip {
            let ip_str = ip.to_string();
            let ip_enrich = build_enrichment(*ip, &ip_str, &segments, &cities);
            let aggregation = build_aggregation(batch_id, &ip_str, ip_records, &ip_enrich);
            docs.push((format!("{batch_id}_{ip_str}"), aggregation));
        }

        self.agg_store.batch_insert(docs).await?;
        Ok(by_ip.len())
    }
}

fn build_enrichment(
    ip: IpAddr,
    ip_str: &str,
    segments: &HashMap<String, domain::AllowedIpSegment>,
    cities: &HashMap<String, domain::CityInfo>,
) -> IpEnrich {
    let mut enrich = IpEnrich::default();
    if let IpAddr::V4(v4) = ip
        && let Some(segment) = segments.get(ip_str)
        && segment.contains(v4)
    {
        enrich.allowed = segment.is_internal;
        enrich.org_name = segment.org_name.clone();
    }
    if let Some(city) = cities.get(ip_str) {
        enrich.city_name = city.city_name.clone();
        enrich.country_name = city.country_name.clone();
        enrich.country_code = city.country_code.clone();
        enrich.continent_name = city.continent_name.clone();
        enrich.continent_code = city.continent_code.clone();
    }
    enrich
}

fn build_aggregation(
    batch_id: &BatchId,
    ip: &str,
    records: &[&LogRecord],
    ip_enrich: &IpEnrich,
) -> AccessIpAggregation {
    let count = records.len() as u64;
    let status = terms(records.iter().map(|r| r.status.to_string()));
    let path_strings: Vec<String> =
        records.iter().map(|r| extract_path(r.request.as_deref())).collect();
    let path = terms(path_strings.iter().cloned());
    let path_categories = terms(path_strings.iter().map(|p| classify_path(p).to_owned()));
    let http_user_agent =
        terms(records.iter().map(|r| r.http_user_agent.clone().unwrap_or_default()));
    let referer_empty_count =
        records.iter().filter(|r| r.http_referer.as_deref() == Some("-")).count() as u64;
    let referer_non_empty_count = count - referer_empty_count;

    let request_length: Vec<f64> = records.iter().map(|r| r.request_length as f64).collect();
    let body_bytes_sent: Vec<f64> = records.iter().map(|r| r.body_bytes_sent as f64).collect();
    let request_time: Vec<f64> = records.iter().map(|r| r.request_time_ms as f64).collect();

    let request_length_stats = ExtendedStats::from_samples(&request_length);
    let body_bytes_stats = ExtendedStats::from_samples(&body_bytes_sent);
    let request_time_stats = ExtendedStats::from_samples(&request_time);

    let behavior_vector = build_behavior_vector(
        ip,
        count,
        &path,
        &path_categories,
        &status,
        referer_empty_count,
        &request_length_stats,
        &body_bytes_stats,
        &request_time_stats,
        &http_user_agent,
    );

    AccessIpAggregation {
        batch_id: batch_id.clone(),
        ip: ip.to_owned(),
        ip_enrich: ip_enrich.clone(),
        count,
        path,
        path_categories,
        status,
        http_user_agent,
        referer_empty_count,
        referer_non_empty_count,
        request_length: request_length_stats,
        body_bytes_sent: body_bytes_stats,
        request_time: request_time_stats,
        behavior_vector,
    }
}

/// `"GET /a?x=1 HTTP/1.1"` -> `"/a"`. Falls back to the empty path on a
/// malformed request line (`request` is already `None` if the field was
/// empty, handled by the caller via `unwrap_or_default`).
fn extract_path(request: Option<&str>) -> String {
    let Some(request) = request else { return String::new() };
    let path = request.split_whitespace().nth(1).unwrap_or("");
    path.split('?').next().unwrap_or("").to_owned()
}

const STATIC_EXTENSIONS: &[&str] =
    &["js", "css", "png", "jpg", "jpeg", "gif", "ico", "svg", "woff", "woff2", "ttf", "map"];

/// No `path_type` classifier survived retrieval from the original source
/// (only its *usage* in the aggregation did); this extension-based
/// classifier is this crate's own addition, recorded in `DESIGN.md`.
fn classify_path(path: &str) -> &'static str {
    if path.is_empty() {
        return "OTHER";
    }
    let ext = path.rsplit('.').next().filter(|_| path.contains('.'));
    match ext {
        Some(ext) if STATIC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => "STATIC",
        _ if path.ends_with('/') || !path.contains('.') => "PAGE",
        _ => "NORMAL",
    }
}

fn terms(values: impl Iterator<Item = String>) -> Vec<KeyValue> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    let mut kvs: Vec<KeyValue> = counts.into_iter().map(|(key, value)| KeyValue { key, value }).collect();
    kvs.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.key.cmp(&b.key)));
    kvs
}

fn ratio_of(buckets: &[KeyValue], key: &str, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    buckets.iter().find(|kv| kv.key == key).map_or(0.0, |kv| kv.value as f64 / total as f64)
}

#[expect(clippy::too_many_arguments, reason = "mirrors the single-pass feature build of the source")]
fn build_behavior_vector(
    ip: &str,
    count: u64,
    path: &[KeyValue],
    path_categories: &[KeyValue],
    status: &[KeyValue],
    referer_empty_count: u64,
    request_length: &ExtendedStats,
    body_bytes_sent: &ExtendedStats,
    request_time: &ExtendedStats,
    http_user_agent: &[KeyValue],
) -> BehaviorVector {
    let mut v = BehaviorVector::zero();

    let (ip_norm, prefix16) = ip_features(ip);
    v.set(BehaviorVector::IP_NORM, ip_norm);
    v.set(BehaviorVector::PREFIX16, prefix16);
    v.set(BehaviorVector::COUNT, count as f64);

    let total_paths: u64 = path.iter().map(|kv| kv.value).sum();
    let distinct_paths = path.len() as f64;
    let top_path_ratio = if total_paths == 0 {
        0.0
    } else {
        path.iter().map(|kv| kv.value).max().unwrap_or(0) as f64 / total_paths as f64
    };
    let path_entropy = shannon_entropy(path, total_paths, 2.0_f64.ln());
    v.set(BehaviorVector::DISTINCT_PATHS, distinct_paths);
    v.set(BehaviorVector::TOP_PATH_RATIO, top_path_ratio);
    v.set(BehaviorVector::PATH_ENTROPY, path_entropy);

    let path_cat_total: u64 = path_categories.iter().map(|kv| kv.value).sum();
    v.set(BehaviorVector::PAGE_RATIO, ratio_of(path_categories, "PAGE", path_cat_total));
    v.set(BehaviorVector::NORMAL_RATIO, ratio_of(path_categories, "NORMAL", path_cat_total));
    v.set(BehaviorVector::STATIC_RATIO, ratio_of(path_categories, "STATIC", path_cat_total));

    let status_total: u64 = status.iter().map(|kv| kv.value).sum();
    let r200 = ratio_of(status, "200", status_total);
    let r403 = ratio_of(status, "403", status_total);
    let r404 = ratio_of(status, "404", status_total);
    let r429 = ratio_of(status, "429", status_total);
    let r499 = ratio_of(status, "499", status_total);
    let redirect = ratio_of(status, "301", status_total) + ratio_of(status, "302", status_total);
    let r5xx = ["500", "502", "503", "504"]
        .iter()
        .map(|s| ratio_of(status, s, status_total))
        .sum::<f64>();
    let other = (1.0 - (r200 + r403 + r404 + r429 + r499 + redirect + r5xx)).max(0.0);
    v.set(BehaviorVector::STATUS_200, r200);
    v.set(BehaviorVector::STATUS_403, r403);
    v.set(BehaviorVector::STATUS_404, r404);
    v.set(BehaviorVector::STATUS_429, r429);
    v.set(BehaviorVector::STATUS_499, r499);
    v.set(BehaviorVector::STATUS_REDIRECT, redirect);
    v.set(BehaviorVector::STATUS_5XX, r5xx);
    v.set(BehaviorVector::STATUS_OTHER, other);

    let ref_empty = if count == 0 { 0.0 } else { referer_empty_count as f64 / count as f64 };
    v.set(BehaviorVector::REF_EMPTY, ref_empty);
    v.set(BehaviorVector::REF_NON_EMPTY, 1.0 - ref_empty);

    v.set(BehaviorVector::REQUEST_LENGTH_AVG, request_length.avg);
    v.set(BehaviorVector::REQUEST_LENGTH_STDDEV, request_length.std_deviation);
    v.set(BehaviorVector::BODY_BYTES_AVG, body_bytes_sent.avg);
    v.set(BehaviorVector::BODY_BYTES_STDDEV, body_bytes_sent.std_deviation);
    v.set(BehaviorVector::REQUEST_TIME_AVG, request_time.avg);
    v.set(BehaviorVector::REQUEST_TIME_STDDEV, request_time.std_deviation);

    let ua_total: u64 = http_user_agent.iter().map(|kv| kv.value).sum();
    let distinct_ua = http_user_agent.len() as f64;
    let ua_entropy = shannon_entropy(http_user_agent, ua_total, 1.0);
    let suspicious = http_user_agent
        .iter()
        .any(|kv| SUSPICIOUS_UA_KEYWORDS.iter().any(|k| kv.key.contains(k)));
    let max_ua_ratio = if ua_total == 0 {
        0.0
    } else {
        http_user_agent.iter().map(|kv| kv.value).max().unwrap_or(0) as f64 / ua_total as f64
    };
    v.set(BehaviorVector::DISTINCT_UA, distinct_ua);
    v.set(BehaviorVector::UA_ENTROPY, ua_entropy);
    v.set(BehaviorVector::SUSPICIOUS_FLAG, if suspicious { 1.0 } else { 0.0 });
    v.set(BehaviorVector::MAX_UA_RATIO, max_ua_ratio);

    let main_ua = http_user_agent.iter().max_by_key(|kv| kv.value).map(|kv| kv.key.as_str()).unwrap_or("");
    let category = ua_category_one_hot(main_ua);
    for (i, value) in category.into_iter().enumerate() {
        v.set(BehaviorVector::UA_CATEGORY_ONE_HOT_START + i, value);
    }

    v
}

/// `ln(base)` is passed in so path entropy (base-2) and UA entropy (natural
/// log) share one implementation, as in the source (§4.6).
fn shannon_entropy(buckets: &[KeyValue], total: u64, ln_base: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let mut entropy = 0.0;
    for kv in buckets {
        if kv.value == 0 {
            continue;
        }
        let p = kv.value as f64 / total as f64;
        entropy -= p * p.ln() / ln_base;
    }
    entropy
}

fn ip_features(ip: &str) -> (f64, f64) {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let octets = v4.octets();
            let ip_u32 = u32::from(v4);
            let ip_norm = f64::from(ip_u32) / f64::from(u32::MAX);
            let prefix16 = f64::from(u16::from_be_bytes([octets[0], octets[1]])) / f64::from(u16::MAX);
            (ip_norm, prefix16)
        }
        Ok(IpAddr::V6(v6)) => {
            let bytes = v6.octets();
            let low32 = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
            let prefix16 = u16::from_be_bytes([bytes[0], bytes[1]]);
            (f64::from(low32) / f64::from(u32::MAX), f64::from(prefix16) / f64::from(u16::MAX))
        }
        Err(_) => (0.0, 0.0),
    }
}

/// One-hot over (desktop, mobile, webview, `?`, spider, other), in that
/// order (§4.6). `?` covers headless/automation UAs, which the source
/// conflates with "desktop" into a single slot — resolved here as its own
/// category instead, recorded in `DESIGN.md`.
fn ua_category_one_hot(ua: &str) -> [f64; 6] {
    let lower = ua.to_ascii_lowercase();
    let mut one_hot = [0.0; 6];
    let index = if lower.is_empty() || lower.contains("headless") || lower.contains("phantomjs") {
        3 // "?"
    } else if lower.contains("android") && (lower.contains("wv") || lower.contains("uni-app")) {
        2 // webview
    } else if lower.contains("android") || lower.contains("iphone") || lower.contains("mobile") {
        1 // mobile
    } else if lower.contains("spider") || lower.contains("bot") {
        4 // spider
    } else if lower.contains("windows") || lower.contains("macintosh") || lower.contains("x11") {
        0 // desktop
    } else {
        5 // other
    };
    one_hot[index] = 1.0;
    one_hot
}
