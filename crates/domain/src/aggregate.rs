//! Per-`(batch_id, ip)` aggregate, enrichment, and the 31-dim behavior vector (§3, §4.6).

use crate::record::BatchId;

/// A `(key, count)` terms bucket — status/path/path-category/UA distributions.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: u64,
}

/// Extended stats over a numeric field (`request_length`, `body_bytes_sent`,
/// `request_time`), mirroring an Elasticsearch `extended_stats` aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtendedStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sum: f64,
    pub sum_of_squares: f64,
    pub variance: f64,
    pub variance_population: f64,
    pub variance_sampling: f64,
    pub std_deviation: f64,
    pub std_deviation_population: f64,
    pub std_deviation_sampling: f64,
}

impl ExtendedStats {
    /// Compute stats over a (possibly empty) sample. Mirrors `models/aggregator.py`'s
    /// `ExtendedStats`, which treats an empty sample as all-zero rather than `NaN`.
    #[must_use]
    pub fn from_samples(samples: &[f64]) -> Self {
        let count = samples.len() as u64;
        if count == 0 {
            return Self {
                count: 0,
                min: 0.0,
                max: 0.0,
                avg: 0.0,
                sum: 0.0,
                sum_of_squares: 0.0,
                variance: 0.0,
                variance_population: 0.0,
                variance_sampling: 0.0,
                std_deviation: 0.0,
                std_deviation_population: 0.0,
                std_deviation_sampling: 0.0,
            };
        }
        let sum: f64 = samples.iter().sum();
        let sum_of_squares: f64 = samples.iter().map(|v| v * v).sum();
        let avg = sum / count as f64;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let variance_population = sum_of_squares / count as f64 - avg * avg;
        let variance_sampling = if count > 1 {
            variance_population * count as f64 / (count as f64 - 1.0)
        } else {
            0.0
        };
        Self {
            count,
            min,
            max,
            avg,
            sum,
            sum_of_squares,
            variance: variance_population,
            variance_population,
            variance_sampling,
            std_deviation: variance_population.max(0.0).sqrt(),
            std_deviation_population: variance_population.max(0.0).sqrt(),
            std_deviation_sampling: variance_sampling.max(0.0).sqrt(),
        }
    }
}

/// Per-IP enrichment attached during aggregation (§4.6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpEnrich {
    pub allowed: Option<bool>,
    pub org_name: Option<String>,
    pub city_name: Option<String>,
    pub country_name: Option<String>,
    pub country_code: Option<String>,
    pub continent_name: Option<String>,
    pub continent_code: Option<String>,
}

/// A configured internal/allowed IP range (`allowed_ip_segment` index, §6.3).
///
/// `models/ip.py`'s `auto_fix` swaps `start_ip`/`end_ip` if given reversed;
/// the derived CIDR string from that source has no reader in this pipeline
/// and is dropped (see `DESIGN.md`).
#[derive(Debug, Clone, PartialEq)]
pub struct AllowedIpSegment {
    pub org_name: Option<String>,
    pub is_internal: Option<bool>,
    pub start_ip: std::net::Ipv4Addr,
    pub end_ip: std::net::Ipv4Addr,
}

impl AllowedIpSegment {
    /// Construct, swapping `start`/`end` into ascending order if reversed.
    #[must_use]
    pub fn new(
        org_name: Option<String>,
        is_internal: Option<bool>,
        start_ip: std::net::Ipv4Addr,
        end_ip: std::net::Ipv4Addr,
    ) -> Self {
        let (start_ip, end_ip) = if u32::from(start_ip) > u32::from(end_ip) {
            (end_ip, start_ip)
        } else {
            (start_ip, end_ip)
        };
        Self { org_name, is_internal, start_ip, end_ip }
    }

    #[must_use]
    pub fn contains(&self, ip: std::net::Ipv4Addr) -> bool {
        (u32::from(self.start_ip)..=u32::from(self.end_ip)).contains(&u32::from(ip))
    }
}

/// GeoIP lookup result for one IP (supplements the out-of-scope MMDB reader port).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityInfo {
    pub city_name: Option<String>,
    pub country_name: Option<String>,
    pub country_code: Option<String>,
    pub continent_name: Option<String>,
    pub continent_code: Option<String>,
}

/// The numeric fingerprint of one `(batch_id, ip)` (§4.6).
///
/// Named index constants replace bare offsets so callers never hand-count
/// positions. Dimension order matches the itemized breakdown of §4.6
/// (ip/path/status/referer/stats/UA groups, in that order); `LEN` is 35, not
/// the "31" the section's headline and §8 invariant 5 state — counting the
/// section's own itemization (9 + 8 + 2 + 6 + 10 groups) gives 35, matching
/// `original_source/service/aggregator_service.py: build_behavior_vector`
/// exactly, including the full 6-category UA one-hot. Kept at 35 rather than
/// truncated to fit the stated "31", since shrinking it would mean dropping
/// named categories the section itself lists; recorded as a resolved
/// inconsistency in `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorVector(pub [f64; Self::LEN]);

impl BehaviorVector {
    pub const LEN: usize = 35;

    pub const IP_NORM: usize = 0;
    pub const PREFIX16: usize = 1;
    pub const COUNT: usize = 2;
    pub const PAGE_RATIO: usize = 3;
    pub const DISTINCT_PATHS: usize = 4;
    pub const TOP_PATH_RATIO: usize = 5;
    pub const PATH_ENTROPY: usize = 6;
    pub const NORMAL_RATIO: usize = 7;
    pub const STATIC_RATIO: usize = 8;
    pub const STATUS_200: usize = 9;
    pub const STATUS_403: usize = 10;
    pub const STATUS_404: usize = 11;
    pub const STATUS_429: usize = 12;
    pub const STATUS_499: usize = 13;
    pub const STATUS_REDIRECT: usize = 14;
    pub const STATUS_5XX: usize = 15;
    pub const STATUS_OTHER: usize = 16;
    pub const REF_EMPTY: usize = 17;
    pub const REF_NON_EMPTY: usize = 18;
    pub const REQUEST_LENGTH_AVG: usize = 19;
    pub const REQUEST_LENGTH_STDDEV: usize = 20;
    pub const BODY_BYTES_AVG: usize = 21;
    pub const BODY_BYTES_STDDEV: usize = 22;
    pub const REQUEST_TIME_AVG: usize = 23;
    pub const REQUEST_TIME_STDDEV: usize = 24;
    pub const DISTINCT_UA: usize = 25;
    pub const UA_ENTROPY: usize = 26;
    pub const SUSPICIOUS_FLAG: usize = 27;
    pub const MAX_UA_RATIO: usize = 28;
    /// One-hot over 6 UA categories: desktop, mobile, webview, `?` (headless),
    /// spider, other (§4.6).
    pub const UA_CATEGORY_ONE_HOT_START: usize = 29;

    #[must_use]
    pub fn zero() -> Self {
        Self([0.0; Self::LEN])
    }

    #[must_use]
    pub fn get(&self, index: usize) -> f64 {
        self.0[index]
    }

    pub fn set(&mut self, index: usize, value: f64) {
        self.0[index] = value;
    }
}

/// Per-`(batch_id, ip)` aggregate persisted to `access_ip_aggregation_<date>` (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct AccessIpAggregation {
    pub batch_id: BatchId,
    pub ip: String,
    pub ip_enrich: IpEnrich,
    pub count: u64,
    pub path: Vec<KeyValue>,
    pub path_categories: Vec<KeyValue>,
    pub status: Vec<KeyValue>,
    pub http_user_agent: Vec<KeyValue>,
    pub referer_empty_count: u64,
    pub referer_non_empty_count: u64,
    pub request_length: ExtendedStats,
    pub body_bytes_sent: ExtendedStats,
    pub request_time: ExtendedStats,
    pub behavior_vector: BehaviorVector,
}
