//! Per-source-IP session identifiers.
//!
//! A session id groups requests from one IP in the event log. The TTL is
//! absolute from insertion, not from last activity: a steady stream of
//! requests from one IP rotates to a new session id every TTL interval.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use rand::RngCore;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionizerConfig {
    pub cache_size: u64,
    pub cache_ttl: Duration,
}

/// Session cache keyed by source IP.
pub struct Sessionizer {
    cache: Cache<String, String>,
}

impl Sessionizer {
    pub fn new(config: SessionizerConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_size)
            // time_to_live, deliberately not time_to_idle: expiry is
            // absolute from insertion.
            .time_to_live(config.cache_ttl)
            .build();
        Self { cache }
    }

    /// Return the live session id for the IP, minting a fresh one on miss.
    pub fn process(&self, ip: &str, now: DateTime<Utc>) -> String {
        if let Some(id) = self.cache.get(ip) {
            return id;
        }

        let id = session_id(now);
        self.cache.insert(ip.to_string(), id.clone());
        id
    }
}

/// `{unix_nanos}_{base64url(10 random bytes)}`.
fn session_id(now: DateTime<Utc>) -> String {
    let timestamp = now.timestamp_nanos_opt().unwrap_or_default();

    let mut rand_bytes = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut rand_bytes);
    format!("{}_{}", timestamp, URL_SAFE.encode(rand_bytes))
}
