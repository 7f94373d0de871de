use async_trait::async_trait;
use redis::RedisResult;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::store::HintStore;

/// Process-local [`HintStore`] with lazy TTL eviction.
///
/// Reads evict the key they touch; every write also purges all expired
/// entries, so keys that are never read again do not accumulate.
///
/// Expiry is measured on the Tokio clock, so tests can drive it with
/// `tokio::time::pause` / `advance`.
#[derive(Default)]
pub struct MemoryHintStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryHintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, if present and not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        evict_expired(&mut entries, key);
        entries.get(key).map(|(value, _)| value.clone())
    }

    /// Remaining time to live of `key`.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        evict_expired(&mut entries, key);
        entries
            .get(key)
            .map(|(_, expires_at)| expires_at.saturating_duration_since(Instant::now()))
    }
}

fn evict_expired(entries: &mut HashMap<String, (String, Instant)>, key: &str) {
    if let Some((_, expires_at)) = entries.get(key) {
        if *expires_at <= Instant::now() {
            entries.remove(key);
        }
    }
}

fn purge_expired(entries: &mut HashMap<String, (String, Instant)>) {
    let now = Instant::now();
    entries.retain(|_, (_, expires_at)| *expires_at > now);
}

#[async_trait]
impl HintStore for MemoryHintStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        purge_expired(&mut entries);
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        purge_expired(&mut entries);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> RedisResult<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        evict_expired(&mut entries, key);
        match entries.get(key) {
            Some((value, _)) if value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
