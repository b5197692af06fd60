//! Key/value cache with TTL. Never authoritative: losing an entry only
//! causes extra work (a resent notification, a re-validated token).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::SharedClock;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("ttl out of range: {0:?}")]
    InvalidTtl(Duration),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

pub type SharedCache = Arc<dyn Cache>;

/// Writes between sweeps of expired entries.
const PRUNE_EVERY: u64 = 256;

pub struct MemoryCache {
    entries: DashMap<String, (String, DateTime<Utc>)>,
    clock: SharedClock,
    writes: AtomicU64,
}

impl MemoryCache {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            writes: AtomicU64::new(0),
        }
    }

    /// Drops every expired entry, not only the ones read again.
    pub fn prune(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.0.clone(), entry.1));
        match hit {
            Some((value, expires_at)) if expires_at > now => Ok(Some(value)),
            Some(_) => {
                self.entries.remove_if(key, |_, (_, exp)| *exp <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| CacheError::InvalidTtl(ttl))?;
        let expires_at = self.clock.now() + ttl;
        self.entries
            .insert(key.to_string(), (value.to_string(), expires_at));
        if self.writes.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        tracing::info!("connected to redis cache");
        Ok(Self { manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut con = self.manager.clone();
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut con = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut con = self.manager.clone();
        let _: () = con.del(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let clock = ManualClock::new(Utc::now());
        let cache = MemoryCache::new(Arc::new(clock.clone()));
        cache
            .set_ex("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(chrono::Duration::seconds(59));
        assert!(cache.get("k").await.unwrap().is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unread_expired_entries_are_swept_by_later_writes() {
        let clock = ManualClock::new(Utc::now());
        let cache = MemoryCache::new(Arc::new(clock.clone()));
        for n in 0..PRUNE_EVERY / 2 {
            cache
                .set_ex(&format!("old:{n}"), "1", Duration::from_secs(1))
                .await
                .unwrap();
        }
        clock.advance(chrono::Duration::seconds(2));
        for n in 0..PRUNE_EVERY / 2 {
            cache
                .set_ex(&format!("new:{n}"), "1", Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(cache.len() as u64, PRUNE_EVERY / 2);
        assert!(cache.get("new:0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = MemoryCache::new(Arc::new(crate::clock::SystemClock));
        cache.set_ex("k", "v", Duration::from_secs(5)).await.unwrap();
        cache.delete("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }
}
