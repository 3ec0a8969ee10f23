//! In-process transport implementing [`RemoteStore`].
//!
//! One `MemoryStore` shared (via `Arc`) between several cache nodes behaves
//! like a single Redis instance: one keyspace, TTL expiry, sets and glob
//! pattern pub/sub. It also exposes a publish counter and an outage switch so
//! degraded paths can be exercised without a network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{StreamExt, future};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::{InboundMessage, MessageStream, RemoteStore, glob_match};
use crate::error::{CacheError, Result};

/// Buffered messages per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum StoredValue {
    Blob(Vec<u8>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct StoredItem {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredItem {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct MemoryStore {
    items: DashMap<String, StoredItem>,
    bus: RwLock<broadcast::Sender<InboundMessage>>,
    available: AtomicBool,
    publish_count: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            items: DashMap::new(),
            bus: RwLock::new(sender),
            available: AtomicBool::new(true),
            publish_count: AtomicU64::new(0),
        }
    }

    /// Number of successful `publish` calls since creation.
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::SeqCst)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.items.iter().filter(|item| !item.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store an arbitrary payload, bypassing any encoding.
    pub fn put_raw(&self, key: &str, payload: Vec<u8>) {
        self.items.insert(
            key.to_string(),
            StoredItem {
                value: StoredValue::Blob(payload),
                expires_at: None,
            },
        );
    }

    /// Remaining time to live of a key, `None` if absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.items
            .get(key)
            .filter(|item| !item.is_expired(now))
            .and_then(|item| item.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Make every operation fail with `StoreUnavailable` and drop all
    /// subscriptions, like a lost connection.
    pub async fn simulate_outage(&self) {
        self.available.store(false, Ordering::SeqCst);
        self.disconnect_subscribers().await;
        tracing::debug!("memory store outage started");
    }

    pub fn restore(&self) {
        self.available.store(true, Ordering::SeqCst);
        tracing::debug!("memory store restored");
    }

    /// End every open subscription stream without changing availability.
    pub async fn disconnect_subscribers(&self) {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        // Dropping the old sender closes its receivers
        *self.bus.write().await = sender;
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::store_unavailable("memory store is offline"))
        }
    }

    fn live(&self, key: &str) -> Option<StoredItem> {
        let now = Instant::now();
        let item = self.items.get(key)?;
        if item.is_expired(now) {
            drop(item);
            self.items.remove(key);
            return None;
        }
        Some(item.clone())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_available()?;
        match self.live(key) {
            Some(StoredItem {
                value: StoredValue::Blob(payload),
                ..
            }) => Ok(Some(payload)),
            Some(_) => Err(CacheError::store_unavailable(format!(
                "WRONGTYPE key {key} does not hold a string"
            ))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, payload: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.ensure_available()?;
        self.items.insert(
            key.to_string(),
            StoredItem {
                value: StoredValue::Blob(payload.to_vec()),
                expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        let now = Instant::now();
        Ok(self
            .items
            .remove(key)
            .is_some_and(|(_, item)| !item.is_expired(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.ensure_available()?;
        if self.live(key).is_some() {
            if let Some(mut item) = self.items.get_mut(key) {
                // TTLs past the clock's range never expire
                item.expires_at = Instant::now().checked_add(ttl);
            }
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.ensure_available()?;
        // Drop an expired set first so the new one starts without a deadline
        let _ = self.live(key);

        let mut entry = self.items.entry(key.to_string()).or_insert_with(|| StoredItem {
            value: StoredValue::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            StoredValue::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            StoredValue::Blob(_) => Err(CacheError::store_unavailable(format!(
                "WRONGTYPE key {key} does not hold a set"
            ))),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.ensure_available()?;
        match self.live(key) {
            Some(StoredItem {
                value: StoredValue::Set(members),
                ..
            }) => {
                let mut members: Vec<String> = members.into_iter().collect();
                members.sort();
                Ok(members)
            }
            Some(_) => Err(CacheError::store_unavailable(format!(
                "WRONGTYPE key {key} does not hold a set"
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.ensure_available()?;
        // No receivers is not an error, same as PUBLISH returning 0
        let _ = self
            .bus
            .read()
            .await
            .send(InboundMessage::new(channel, message));
        self.publish_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream> {
        self.ensure_available()?;
        let receiver = self.bus.read().await.subscribe();
        let pattern = pattern.to_string();

        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let message = match item {
                Ok(message) if glob_match(&pattern, &message.channel) => Some(message),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged, messages dropped");
                    None
                }
            };
            future::ready(message)
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blob_roundtrip_and_ttl() {
        let store = MemoryStore::new();
        store.set("a", b"1", None).await.unwrap();
        store
            .set("b", b"2", Some(Duration::from_millis(10)))
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert!(store.ttl("a").is_none());
        assert!(store.ttl("b").is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("b").await.unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("blob", b"1", Some(Duration::MAX)).await.unwrap();
        store.sadd("idx", "k").await.unwrap();
        store.expire("idx", Duration::MAX).await.unwrap();

        assert_eq!(store.get("blob").await.unwrap(), Some(b"1".to_vec()));
        assert!(store.ttl("blob").is_none());
        assert_eq!(store.smembers("idx").await.unwrap(), vec!["k"]);
    }

    #[tokio::test]
    async fn test_sets_and_expire() {
        let store = MemoryStore::new();
        store.sadd("idx", "k2").await.unwrap();
        store.sadd("idx", "k1").await.unwrap();
        store.sadd("idx", "k1").await.unwrap();
        store.expire("idx", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.smembers("idx").await.unwrap(), vec!["k1", "k2"]);
        assert!(store.ttl("idx").is_some());
        assert!(store.smembers("missing").await.unwrap().is_empty());

        assert!(store.del("idx").await.unwrap());
        assert!(!store.del("idx").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.set("blob", b"x", None).await.unwrap();
        assert!(store.sadd("blob", "m").await.is_err());
        assert!(store.smembers("blob").await.is_err());
    }

    #[tokio::test]
    async fn test_pattern_subscription() {
        let store = MemoryStore::new();
        let mut stream = store.psubscribe("1.0Redis.*").await.unwrap();

        store.publish("other", "ignored").await.unwrap();
        store.publish("1.0Redis.Remove", "n1:key").await.unwrap();

        let message = stream.next().await.unwrap();
        assert_eq!(message, InboundMessage::new("1.0Redis.Remove", "n1:key"));
        assert_eq!(store.publish_count(), 2);
    }

    #[tokio::test]
    async fn test_outage() {
        let store = MemoryStore::new();
        let mut stream = store.psubscribe("*").await.unwrap();

        store.simulate_outage().await;
        assert!(matches!(
            store.get("a").await,
            Err(CacheError::StoreUnavailable(_))
        ));
        assert!(store.publish("c", "m").await.is_err());
        assert!(stream.next().await.is_none());

        store.restore();
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.publish_count(), 0);
    }
}
