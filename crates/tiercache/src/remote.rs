//! Remote tier client.
//!
//! Wraps a [`RemoteStore`] with the payload codec, the advisory per-scope key
//! index and the invalidation publishers.
//!
//! ## Advisory key index
//!
//! Every successful `set` of a key with a base scope adds the key to the set
//! `<prefix>REDIS_KEYS_<scope>`. The index is best-effort: failures to update
//! it are logged and ignored, and it may list keys that have since expired.
//! It only drives bulk operations such as [`RemoteCacheClient::keys_for_scope`].

use std::sync::Arc;
use std::time::Duration;

use crate::codec;
use crate::error::{CacheError, Lookup, Result};
use crate::invalidation::{Channels, InstanceIdentity, InvalidationMessage};
use crate::key::KeyNamespace;
use crate::store::RemoteStore;
use crate::value::CacheValue;

pub struct RemoteCacheClient {
    store: Arc<dyn RemoteStore>,
    namespace: KeyNamespace,
    channels: Channels,
    identity: InstanceIdentity,
    scope_index_ttl: Duration,
}

impl RemoteCacheClient {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        namespace: KeyNamespace,
        channels: Channels,
        identity: InstanceIdentity,
        scope_index_ttl: Duration,
    ) -> Self {
        Self {
            store,
            namespace,
            channels,
            identity,
            scope_index_ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    /// Fetch and decode a value.
    ///
    /// A corrupt payload is reported as `Failed(DecodeFailure)`, never as a miss.
    pub async fn get(&self, key: &str) -> Lookup<CacheValue> {
        let payload = match self.store.get(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::debug!(key = %key, "remote cache miss");
                return Lookup::Miss;
            }
            Err(e) => return Lookup::Failed(e),
        };

        match codec::decode(key, &payload) {
            Ok(value) => {
                tracing::debug!(key = %key, "remote cache hit");
                Lookup::Hit(value)
            }
            Err(e) => Lookup::Failed(e),
        }
    }

    /// Encode and store a value, then record the key in its scope index.
    pub async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<()> {
        let payload = codec::encode(key, value)?;
        self.store.set(key, &payload, ttl).await?;
        tracing::debug!(key = %key, bytes = payload.len(), "remote cache set");

        let scope = self.namespace.base_scope(key);
        if !scope.is_empty() {
            self.index_key(scope, key).await;
        }
        Ok(())
    }

    async fn index_key(&self, scope: &str, key: &str) {
        let index = self.scope_index_key(scope);
        let result = async {
            self.store.sadd(&index, key).await?;
            self.store.expire(&index, self.scope_index_ttl).await
        }
        .await;

        if let Err(e) = result {
            tracing::debug!(key = %key, index = %index, error = %e, "scope index update skipped");
        }
    }

    /// Delete a key from the remote store. Returns whether it existed.
    pub async fn del(&self, key: &str) -> Result<bool> {
        self.store.del(key).await
    }

    /// Check that `kind` and `data` fit the Clear payload framing.
    pub fn check_clear(&self, kind: &str, data: &str) -> Result<()> {
        InvalidationMessage::clear(&self.identity, kind, data)
            .encode(&self.channels)
            .map(|_| ())
    }

    /// Publish `Clear{kind, data}` tagged with this node's identity.
    pub async fn publish_clear(&self, kind: &str, data: &str) -> Result<()> {
        self.publish_message(InvalidationMessage::clear(&self.identity, kind, data))
            .await
    }

    /// Publish `Remove{key}` tagged with this node's identity.
    pub async fn publish_remove(&self, key: &str) -> Result<()> {
        self.publish_message(InvalidationMessage::remove(&self.identity, key))
            .await
    }

    async fn publish_message(&self, message: InvalidationMessage) -> Result<()> {
        let payload = message.encode(&self.channels)?;
        let channel = message.channel(&self.channels);
        self.store.publish(channel, &payload).await?;
        tracing::debug!(channel = %channel, payload = %payload, "published invalidation");
        Ok(())
    }

    /// Publish an arbitrary message on an arbitrary channel.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.store.publish(channel, message).await
    }

    /// Read a plain string, bypassing the codec.
    pub async fn direct_get(&self, key: &str) -> Result<Option<String>> {
        match self.store.get(key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| CacheError::decode_failure(key, e)),
            None => Ok(None),
        }
    }

    /// Write a plain string, bypassing the codec and the scope index.
    pub async fn direct_set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.store.set(key, value.as_bytes(), ttl).await
    }

    /// Members of the set stored at `<prefix><key>`.
    pub async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let key = format!("{}{key}", self.channels.prefix());
        self.store.smembers(&key).await
    }

    pub fn scope_index_key(&self, scope: &str) -> String {
        format!("{}REDIS_KEYS_{scope}", self.channels.prefix())
    }

    /// Keys recorded in a scope's advisory index.
    pub async fn keys_for_scope(&self, scope: &str) -> Result<Vec<String>> {
        self.store.smembers(&self.scope_index_key(scope)).await
    }

    /// Drop a scope's advisory index.
    pub async fn drop_scope_index(&self, scope: &str) -> Result<()> {
        self.store.del(&self.scope_index_key(scope)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use futures_util::StreamExt;

    fn client(store: Arc<MemoryStore>) -> RemoteCacheClient {
        RemoteCacheClient::new(
            store,
            KeyNamespace::default(),
            Channels::new("1.0"),
            InstanceIdentity::for_host("host1"),
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn test_get_hit_miss_and_corrupt() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store.clone());

        assert!(client.get("ECM_1.a").await.is_miss());

        client
            .set("ECM_1.a", &CacheValue::Text("x".into()), None)
            .await
            .unwrap();
        assert_eq!(client.get("ECM_1.a").await.hit(), Some(CacheValue::Text("x".into())));

        store.put_raw("ECM_1.bad", b"not ours".to_vec());
        assert!(matches!(
            client.get("ECM_1.bad").await,
            Lookup::Failed(CacheError::DecodeFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_unavailable() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store.clone());
        store.simulate_outage().await;

        assert!(matches!(
            client.get("ECM_1.a").await,
            Lookup::Failed(CacheError::StoreUnavailable(_))
        ));
        assert!(client.set("ECM_1.a", &CacheValue::Null, None).await.is_err());
    }

    #[tokio::test]
    async fn test_set_records_scope_index() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store.clone());

        client
            .set("ECM_42.SESSION_A", &CacheValue::Int(1), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        client
            .set("ECM_42.SESSION_B", &CacheValue::Int(2), None)
            .await
            .unwrap();
        client.set("ECM_NOSCOPE", &CacheValue::Int(3), None).await.unwrap();

        assert_eq!(
            client.keys_for_scope("42").await.unwrap(),
            vec!["ECM_42.SESSION_A", "ECM_42.SESSION_B"]
        );
        assert!(store.ttl("1.0REDIS_KEYS_42").is_some());

        client.drop_scope_index("42").await.unwrap();
        assert!(client.keys_for_scope("42").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_formats() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store.clone());
        let mut stream = store.psubscribe("1.0Redis.*").await.unwrap();

        client.publish_clear("portal", "7").await.unwrap();
        client.publish_remove("ECM_1.a:b").await.unwrap();

        let clear = stream.next().await.unwrap();
        assert_eq!(clear.channel, "1.0Redis.Clear");
        assert_eq!(clear.payload, "host1_Process_000000:portal:7");

        let remove = stream.next().await.unwrap();
        assert_eq!(remove.channel, "1.0Redis.Remove");
        assert_eq!(remove.payload, "host1_Process_000000:ECM_1.a:b");
    }

    #[tokio::test]
    async fn test_direct_access_and_set_members() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store.clone());

        client.direct_set("plain", "value", None).await.unwrap();
        assert_eq!(client.direct_get("plain").await.unwrap().as_deref(), Some("value"));
        assert_eq!(client.direct_get("missing").await.unwrap(), None);

        store.sadd("1.0online", "alice").await.unwrap();
        assert_eq!(client.set_members("online").await.unwrap(), vec!["alice"]);
    }
}
