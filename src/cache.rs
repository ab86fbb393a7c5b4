//! Durable response cache keyed by `{port}_{url}`.
//!
//! Rows are plain inserts; reads always select the most recent row for a
//! key by `cachedAt`, so repeated stores for the same key behave as an
//! update without requiring a uniqueness constraint.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// A fresh response was found.
    Hit(Vec<u8>),
    /// No row exists for the key.
    Miss,
    /// A row exists but is older than the configured TTL.
    Expired,
    /// Caching is disabled (`ttl_hours == 0`); storage was not touched.
    Disabled,
}

/// Thread-safe response cache backed by SQLite.
#[derive(Clone)]
pub struct ResponseCache {
    conn: Arc<Mutex<Connection>>,
}

/// Builds the cache key for a port/URL pair. No escaping is applied; the
/// fixed `{port}_` prefix keeps keys from colliding across ports.
pub fn cache_key(port: u16, url: &str) -> String {
    format!("{}_{}", port, url)
}

impl ResponseCache {
    /// Open or create the cache database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(&path).with_context(|| {
            format!("failed to open cache database: {}", path.as_ref().display())
        })?;

        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    /// Open an in-memory cache (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cachedAt DATETIME,
                key TEXT,
                response BLOB
            );
            "#,
        )?;
        Ok(())
    }

    /// Look up a cached response.
    ///
    /// `ttl_hours == 0` disables caching and returns [`CacheLookup::Disabled`]
    /// without touching storage; `ttl_hours == -1` means no expiration.
    /// Storage errors propagate and are distinct from a miss.
    pub fn lookup(&self, port: u16, url: &str, ttl_hours: i64) -> Result<CacheLookup> {
        if ttl_hours == 0 {
            return Ok(CacheLookup::Disabled);
        }

        let key = cache_key(port, url);
        let conn = self.conn.lock();

        // Most recent row wins; the schema allows multiple rows per key.
        let row: Option<(DateTime<Utc>, Vec<u8>)> = conn
            .query_row(
                "SELECT cachedAt, response FROM cache WHERE key = ?1 ORDER BY cachedAt DESC LIMIT 1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("cache read failed")?;

        let (cached_at, response) = match row {
            Some(row) => row,
            None => return Ok(CacheLookup::Miss),
        };

        if ttl_hours < 0 {
            return Ok(CacheLookup::Hit(response));
        }

        if Utc::now() - cached_at > Duration::hours(ttl_hours) {
            return Ok(CacheLookup::Expired);
        }

        Ok(CacheLookup::Hit(response))
    }

    /// Store a response under the port/URL key. The caller guarantees the
    /// bytes deserialize to a valid response shape.
    pub fn store(&self, port: u16, url: &str, response: &[u8]) -> Result<()> {
        self.store_at(port, url, response, Utc::now())
    }

    fn store_at(&self, port: u16, url: &str, response: &[u8], at: DateTime<Utc>) -> Result<()> {
        let key = cache_key(port, url);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cache (cachedAt, key, response) VALUES (?1, ?2, ?3)",
            params![at, key, response],
        )
        .context("cache write failed")?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn store_aged(
        &self,
        port: u16,
        url: &str,
        response: &[u8],
        age: Duration,
    ) -> Result<()> {
        self.store_at(port, url, response, Utc::now() - age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        assert_eq!(cache_key(8080, "http://x/p"), "8080_http://x/p");
        assert_eq!(cache_key(443, "/"), "443_/");
    }

    #[test]
    fn keys_differ_across_ports() {
        assert_ne!(cache_key(80, "/a"), cache_key(8080, "/a"));
        assert_eq!(cache_key(80, "/a"), cache_key(80, "/a"));
    }

    #[test]
    fn store_then_lookup_hits() {
        let cache = ResponseCache::open_in_memory().unwrap();
        let body = br#"{"headers":{"X":"1"},"body":"cached"}"#;
        cache.store(8080, "http://x/p", body).unwrap();

        match cache.lookup(8080, "http://x/p", 24).unwrap() {
            CacheLookup::Hit(bytes) => assert_eq!(bytes, body),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn missing_key_is_a_miss() {
        let cache = ResponseCache::open_in_memory().unwrap();
        assert_eq!(cache.lookup(8080, "/nope", 24).unwrap(), CacheLookup::Miss);
    }

    #[test]
    fn zero_ttl_disables_without_reading() {
        let cache = ResponseCache::open_in_memory().unwrap();
        cache.store(8080, "/p", b"x").unwrap();
        assert_eq!(cache.lookup(8080, "/p", 0).unwrap(), CacheLookup::Disabled);
    }

    #[test]
    fn negative_ttl_never_expires() {
        let cache = ResponseCache::open_in_memory().unwrap();
        cache
            .store_aged(8080, "/p", b"old", Duration::days(400))
            .unwrap();
        match cache.lookup(8080, "/p", -1).unwrap() {
            CacheLookup::Hit(bytes) => assert_eq!(bytes, b"old"),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn stale_row_is_expired() {
        let cache = ResponseCache::open_in_memory().unwrap();
        cache
            .store_aged(8080, "/p", b"old", Duration::hours(2))
            .unwrap();
        assert_eq!(cache.lookup(8080, "/p", 1).unwrap(), CacheLookup::Expired);
    }

    #[test]
    fn reads_are_most_recent_first() {
        let cache = ResponseCache::open_in_memory().unwrap();
        cache
            .store_aged(8080, "/p", b"first", Duration::minutes(10))
            .unwrap();
        cache.store(8080, "/p", b"second").unwrap();

        match cache.lookup(8080, "/p", 24).unwrap() {
            CacheLookup::Hit(bytes) => assert_eq!(bytes, b"second"),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn ports_do_not_collide() {
        let cache = ResponseCache::open_in_memory().unwrap();
        cache.store(80, "/p", b"a").unwrap();
        assert_eq!(cache.lookup(8080, "/p", 24).unwrap(), CacheLookup::Miss);
    }
}
