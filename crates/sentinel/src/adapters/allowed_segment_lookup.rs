// Rust guideline compliant 2026-02-16

//! `AllowedSegmentLookup` adapter over a flat in-memory list of configured
//! ranges, loaded once at startup from the `nginx.black_list_file`-style
//! segment list (§4.6). A real deployment would query a document store's
//! `allowed_ip_segment` index; an in-memory range scan is the simplest
//! adapter that satisfies the port and is adequate at the scale §1 targets
//! (a handful of configured segments, not a routing table).

use std::net::Ipv4Addr;

use domain::{AllowedIpSegment, AllowedSegmentLookup, DocumentStoreError};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct InMemoryAllowedSegmentLookup {
    segments: Vec<AllowedIpSegment>,
}

impl InMemoryAllowedSegmentLookup {
    #[must_use]
    pub fn new(segments: Vec<AllowedIpSegment>) -> Self {
        Self { segments }
    }
}

impl AllowedSegmentLookup for InMemoryAllowedSegmentLookup {
    /// Range match `start_ip <= ip <= end_ip` (§4.6). Non-IPv4 addresses
    /// (e.g. IPv6 literals) never match any configured segment, since
    /// `AllowedIpSegment` bounds are `Ipv4Addr`.
    async fn query_ips(&self, ips: &[String]) -> Result<HashMap<String, AllowedIpSegment>, DocumentStoreError> {
        let mut out = HashMap::new();
        for ip in ips {
            let Ok(parsed) = ip.parse::<Ipv4Addr>() else { continue };
            if let Some(segment) = self.segments.iter().find(|seg| seg.start_ip <= parsed && parsed <= seg.end_ip) {
                out.insert(ip.clone(), segment.clone());
            }
        }
        Ok(out)
    }
}
