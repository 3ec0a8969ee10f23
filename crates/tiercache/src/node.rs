//! Wiring of one cache node: local tier, remote client, orchestrator, the
//! invalidation listener and the expiry sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CacheSettings;
use crate::error::{CacheError, Result};
use crate::invalidation::{BusHandle, BusState, Channels, InstanceIdentity, InvalidationBus};
use crate::key::KeyNamespace;
use crate::local::{DashMapLocalCache, LocalCache};
use crate::remote::RemoteCacheClient;
use crate::smart::SmartCache;
use crate::store::{RedisStore, RemoteStore};

/// A running cache node.
///
/// Dropping the node leaves its background tasks running until the runtime
/// stops; call [`shutdown`](Self::shutdown) for an orderly teardown.
pub struct CacheNode {
    cache: Arc<SmartCache>,
    local: Arc<DashMapLocalCache>,
    bus: BusHandle,
    sweeper: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    redis: Option<Arc<RedisStore>>,
}

impl CacheNode {
    /// Start a node backed by Redis.
    pub fn connect(settings: &CacheSettings) -> Result<Self> {
        settings.validate().map_err(CacheError::configuration)?;
        let redis = Arc::new(RedisStore::new(settings.redis.clone())?);
        tracing::info!(url = %redis.url(), "Starting cache node on Redis");

        let mut node = Self::start(settings, redis.clone())?;
        node.redis = Some(redis);
        Ok(node)
    }

    /// Start a node on any remote store.
    pub fn start(settings: &CacheSettings, store: Arc<dyn RemoteStore>) -> Result<Self> {
        Self::start_with_local(settings, store, Arc::new(DashMapLocalCache::new()))
    }

    /// Start a node with a preconfigured local tier, e.g. one using a custom
    /// clear predicate.
    pub fn start_with_local(
        settings: &CacheSettings,
        store: Arc<dyn RemoteStore>,
        local: Arc<DashMapLocalCache>,
    ) -> Result<Self> {
        settings.validate().map_err(CacheError::configuration)?;

        let identity = InstanceIdentity::resolve(settings.instance_id.as_deref());
        let namespace = KeyNamespace::new(settings.distributed_tag.clone());
        let channels = Channels::new(settings.key_prefix.clone());

        let remote = Arc::new(RemoteCacheClient::new(
            store.clone(),
            namespace.clone(),
            channels.clone(),
            identity.clone(),
            settings.scope_index_ttl(),
        ));
        let cache = Arc::new(SmartCache::new(
            namespace,
            local.clone(),
            remote,
            settings.local.default_ttl(),
        ));

        let shutdown = CancellationToken::new();
        let bus = InvalidationBus::new(
            store,
            local.clone(),
            identity.clone(),
            channels,
            &settings.listener,
        )
        .spawn(shutdown.child_token());

        let sweeper = settings
            .local
            .cleanup_interval()
            .map(|interval| spawn_sweeper(local.clone(), interval, shutdown.child_token()));

        tracing::info!(
            instance = %identity,
            key_prefix = %settings.key_prefix,
            "Cache node started"
        );

        Ok(Self {
            cache,
            local,
            bus,
            sweeper,
            shutdown,
            redis: None,
        })
    }

    pub fn cache(&self) -> &Arc<SmartCache> {
        &self.cache
    }

    pub fn local(&self) -> &Arc<DashMapLocalCache> {
        &self.local
    }

    pub fn identity(&self) -> &InstanceIdentity {
        self.cache.identity()
    }

    pub fn bus_state(&self) -> BusState {
        self.bus.state()
    }

    /// Wait until the invalidation listener is subscribed.
    pub async fn wait_listening(&self) -> bool {
        self.bus.wait_listening().await
    }

    pub async fn wait_for_bus_state(&self, state: BusState) -> bool {
        self.bus.wait_for(state).await
    }

    /// Stop background tasks and release the remote connection pool.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.bus.shutdown().await;
        if let Some(sweeper) = self.sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "expiry sweeper task failed");
            }
        }
        if let Some(redis) = self.redis {
            redis.close();
        }
        tracing::info!("Cache node stopped");
    }
}

fn spawn_sweeper(
    local: Arc<DashMapLocalCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = local.cleanup_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "expired local entries swept");
                    }
                }
            }
        }
    })
}
