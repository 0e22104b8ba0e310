//! TTL response cache for per-URL audit payloads.
//!
//! Entries live in process memory behind one RwLock. Expiry is logical: a
//! lookup treats a stale entry as absent but leaves it resident until
//! `cleanup_expired` reclaims it, so reads never pay for deletions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::db::error::DbResult;

/// Lowercase hex SHA-256 of a source URL, the platform's canonical handle
/// for an audit target.
pub fn url_hash(source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// One cached audit payload. Field names on the wire follow the dashboard
/// contract, which is shared with the durable `cached_responses` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    #[serde(rename = "url")]
    pub source_url: String,
    #[serde(rename = "urlHash")]
    pub url_hash: String,
    #[serde(rename = "data")]
    pub payload: Value,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    pub tags: Vec<String>,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "accessCount")]
    pub access_count: u64,
    #[serde(rename = "lastAccessed")]
    pub last_accessed_at: DateTime<Utc>,
    pub version: String,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub average_size_bytes: f64,
    pub expired_count: usize,
    pub average_access_count: f64,
    pub evicted_total: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

#[derive(Debug)]
pub struct CacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evicted_total: AtomicU64,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evicted_total: AtomicU64::new(0),
        }
    }

    /// Returns the cached payload, or `None` when the key is absent or past
    /// its expiry. A hit bumps the entry's access count and freshness.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {}
                _ => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Re-check under the write lock; the entry may have been replaced
        // or cleaned up between the two lock acquisitions.
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.access_count += 1;
                entry.last_accessed_at = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.payload.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a payload under `key`, replacing any previous entry. Replacing
    /// increments the existing access count; a fresh insert starts at 1.
    /// Without an explicit TTL the configured default applies.
    pub async fn set(
        &self,
        key: &str,
        source_url: &str,
        payload: Value,
        ttl: Option<Duration>,
        tags: Vec<String>,
    ) -> DbResult<()> {
        let size_bytes = serde_json::to_vec(&payload)?.len() as u64;
        let now = self.clock.now();
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let expires_at = now + chrono::Duration::milliseconds(ttl.as_millis() as i64);

        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(existing) => {
                existing.source_url = source_url.to_string();
                existing.url_hash = url_hash(source_url);
                existing.payload = payload;
                existing.expires_at = expires_at;
                existing.tags = tags;
                existing.size_bytes = size_bytes;
                existing.access_count += 1;
                existing.last_accessed_at = now;
                existing.version = self.config.version.clone();
            }
            None => {
                if self.config.max_entries > 0 {
                    while entries.len() >= self.config.max_entries {
                        if !self.evict_one(&mut entries) {
                            break;
                        }
                    }
                }
                entries.insert(
                    key.to_string(),
                    CacheEntry {
                        key: key.to_string(),
                        source_url: source_url.to_string(),
                        url_hash: url_hash(source_url),
                        payload,
                        expires_at,
                        tags,
                        size_bytes,
                        access_count: 1,
                        last_accessed_at: now,
                        version: self.config.version.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Removes `key` if present. Absent keys are a no-op.
    pub async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drops every entry past its expiry and returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        let removed = expired.len();
        for key in expired {
            entries.remove(&key);
        }
        if removed > 0 {
            debug!(removed, "removed expired cache entries");
        }
        removed
    }

    /// Snapshot of one entry for inspection. Does not touch access
    /// accounting and returns expired entries that cleanup has not yet
    /// reclaimed.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Aggregates over the live map. Linear in the number of entries.
    pub async fn statistics(&self) -> CacheStatistics {
        let now = self.clock.now();
        let entries = self.entries.read().await;

        let total_entries = entries.len();
        let total_size_bytes: u64 = entries.values().map(|e| e.size_bytes).sum();
        let expired_count = entries.values().filter(|e| e.is_expired(now)).count();
        let total_access: u64 = entries.values().map(|e| e.access_count).sum();

        let (average_size_bytes, average_access_count) = if total_entries == 0 {
            (0.0, 0.0)
        } else {
            (
                total_size_bytes as f64 / total_entries as f64,
                total_access as f64 / total_entries as f64,
            )
        };

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_ratio = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        CacheStatistics {
            total_entries,
            total_size_bytes,
            average_size_bytes,
            expired_count,
            average_access_count,
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
            hits,
            misses,
            hit_ratio,
        }
    }

    fn evict_one(&self, entries: &mut HashMap<String, CacheEntry>) -> bool {
        let stale_key = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed_at)
            .map(|(key, _)| key.clone());
        match stale_key {
            Some(key) => {
                debug!(key = %key, "cache full, evicting least recently accessed entry");
                entries.remove(&key);
                self.evicted_total.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> CacheConfig {
        CacheConfig {
            default_ttl_seconds: 3600,
            max_entries: 10_000,
            version: "1".to_string(),
        }
    }

    #[test]
    fn url_hash_is_lowercase_hex() {
        let hash = url_hash("https://example.com/audit");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(
            hash,
            "7bf13c82d7a29851690a2c652645e73de757ddbcaeb41e8e8c8464c61417e0b8"
        );
    }

    #[tokio::test]
    async fn expiry_boundary_is_inclusive() {
        let clock = Arc::new(crate::clock::ManualClock::new(Utc::now()));
        let cache = CacheStore::with_clock(test_config(), clock.clone());
        cache
            .set(
                "audit_1",
                "https://example.com/",
                json!({"score": 87}),
                Some(Duration::from_secs(10)),
                vec![],
            )
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(10));
        // now == expires_at counts as expired
        assert!(cache.get("audit_1").await.is_none());
    }

    #[tokio::test]
    async fn size_reflects_serialized_payload() {
        let cache = CacheStore::new(test_config());
        let payload = json!({"score": 87, "issues": ["missing-alt"]});
        let expected = serde_json::to_vec(&payload).unwrap().len() as u64;
        cache
            .set("audit_1", "https://example.com/", payload, None, vec![])
            .await
            .unwrap();
        assert_eq!(cache.entry("audit_1").await.unwrap().size_bytes, expected);
    }
}
