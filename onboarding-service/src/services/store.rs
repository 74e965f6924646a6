use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client, Script};
use tokio::{task::JoinHandle, time::MissedTickBehavior};

/// `INCR` and start the window on the first hit, in one round trip.
const INCR_WINDOW_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
"#;

/// Key-value store with per-key TTL for codes, counters and sessions.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error>;

    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error>;

    /// Atomically increment a counter. The window starts at the first
    /// increment and is not extended by later ones.
    async fn incr_window(&self, key: &str, window_seconds: u64) -> Result<u64, anyhow::Error>;

    /// Remaining TTL in seconds, `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error>;

    async fn set_add(&self, key: &str, member: &str, ttl_seconds: u64)
        -> Result<(), anyhow::Error>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, anyhow::Error>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    manager: ConnectionManager,
    incr_window: Script,
}

impl RedisStore {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            incr_window: Script::new(INCR_WINDOW_SCRIPT),
        })
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read key: {}", e))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write key: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete key: {}", e))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check key: {}", e))
    }

    async fn incr_window(&self, key: &str, window_seconds: u64) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        self.incr_window
            .key(key)
            .arg(window_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment counter: {}", e))
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read TTL: {}", e))?;
        // -2 missing, -1 no expiry
        Ok((ttl >= 0).then_some(ttl as u64))
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(key)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds.max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to add set member: {}", e))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read set: {}", e))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to remove set member: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

enum Slot {
    Value(String),
    Set(HashSet<String>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(slot: Slot, ttl_seconds: u64) -> Self {
        Self {
            slot,
            expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store for tests and local development. Reads drop an expired
/// key on sight; [`MemoryStore::spawn_sweeper`] clears the ones never read again.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every expired entry. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweeps on a fixed period until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = store.len(), "Swept expired store entries");
                }
            }
        })
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.purge_if_expired(key);
        match self.entries.get(key).as_deref() {
            Some(Entry {
                slot: Slot::Value(v),
                ..
            }) => Ok(Some(v.clone())),
            Some(_) => Err(anyhow::anyhow!("Key {} does not hold a string", key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        self.entries.insert(
            key.to_string(),
            Entry::new(Slot::Value(value.to_string()), ttl_seconds),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        self.purge_if_expired(key);
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
        self.purge_if_expired(key);
        Ok(self.entries.contains_key(key))
    }

    async fn incr_window(&self, key: &str, window_seconds: u64) -> Result<u64, anyhow::Error> {
        self.purge_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Slot::Value("0".to_string()), window_seconds));

        match &mut entry.slot {
            Slot::Value(v) => {
                let next = v
                    .parse::<u64>()
                    .map_err(|_| anyhow::anyhow!("Key {} does not hold a counter", key))?
                    + 1;
                *v = next.to_string();
                Ok(next)
            }
            Slot::Set(_) => Err(anyhow::anyhow!("Key {} does not hold a counter", key)),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
        self.purge_if_expired(key);
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now).as_secs()))
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        self.purge_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Slot::Set(HashSet::new()), ttl_seconds));
        entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));

        match &mut entry.slot {
            Slot::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            Slot::Value(_) => Err(anyhow::anyhow!("Key {} does not hold a set", key)),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, anyhow::Error> {
        self.purge_if_expired(key);
        match self.entries.get(key).as_deref() {
            Some(Entry {
                slot: Slot::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(anyhow::anyhow!("Key {} does not hold a set", key)),
            None => Ok(Vec::new()),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), anyhow::Error> {
        self.purge_if_expired(key);
        if let Some(mut entry) = self.entries.get_mut(key) {
            if let Slot::Set(members) = &mut entry.slot {
                members.remove(member);
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("k", "v", 60).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("k").await.unwrap());
        assert!(store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let store = MemoryStore::new();
        store.set("k", "v", 0).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweep_drops_only_expired_entries() {
        let store = MemoryStore::new();
        store.set("blacklist:a", "revoked", 0).await.unwrap();
        store.incr_window("otp_limit:b", 0).await.unwrap();
        store.set("session:c", "{}", 60).await.unwrap();
        assert_eq!(store.len(), 3);

        assert_eq!(store.sweep_expired(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.exists("session:c").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_interval_and_stops_with_store() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = store.spawn_sweeper(Duration::from_secs(30));
        store.set("otp:x:login", "{}", 0).await.unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.is_empty());

        drop(store);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(sweeper.is_finished());
    }

    #[tokio::test]
    async fn test_incr_window_counts_within_window() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_window("c", 300).await.unwrap(), 1);
        assert_eq!(store.incr_window("c", 300).await.unwrap(), 2);
        assert_eq!(store.incr_window("c", 300).await.unwrap(), 3);

        let ttl = store.ttl("c").await.unwrap().unwrap();
        assert!(ttl <= 300 && ttl >= 298);
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::new();
        store.set_add("s", "a", 60).await.unwrap();
        store.set_add("s", "b", 60).await.unwrap();
        store.set_add("s", "a", 60).await.unwrap();

        let mut members = store.set_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);

        store.set_remove("s", "a").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["b".to_string()]);
        assert!(store.get("s").await.is_err());
    }
}
