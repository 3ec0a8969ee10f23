pub mod cache;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};
use tiercache::invalidation::Channels;
use tiercache::{
    CacheSettings, DashMapLocalCache, InstanceIdentity, KeyNamespace, RedisStore,
    RemoteCacheClient, RemoteStore, SmartCache,
};

/// Cache handle for one-shot commands.
///
/// The CLI never starts an invalidation listener; its local tier only lives
/// for the duration of a single command.
pub struct Session {
    pub store: Arc<RedisStore>,
    pub cache: SmartCache,
    pub channels: Channels,
}

impl Session {
    pub fn open(settings: &CacheSettings) -> Result<Self> {
        let store = Arc::new(
            RedisStore::new(settings.redis.clone()).context("failed to configure Redis store")?,
        );
        let remote_store: Arc<dyn RemoteStore> = store.clone();
        let namespace = KeyNamespace::new(settings.distributed_tag.clone());
        let channels = Channels::new(settings.key_prefix.clone());
        let identity = cli_identity(settings);

        let remote = Arc::new(RemoteCacheClient::new(
            remote_store,
            namespace.clone(),
            channels.clone(),
            identity,
            settings.scope_index_ttl(),
        ));
        let cache = SmartCache::new(
            namespace,
            Arc::new(DashMapLocalCache::new()),
            remote,
            settings.local.default_ttl(),
        );

        Ok(Self {
            store,
            cache,
            channels,
        })
    }

    pub fn close(self) {
        self.store.close();
    }
}

/// Configured instance id, else a per-process identity distinct from any node
/// on this host so local nodes do not discard what the CLI publishes.
fn cli_identity(settings: &CacheSettings) -> InstanceIdentity {
    match settings.instance_id.as_deref() {
        Some(id) => InstanceIdentity::new(id),
        None => InstanceIdentity::tool_on_host("Cli"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_identity_is_not_the_host_node_identity() {
        let identity = cli_identity(&CacheSettings::default());
        assert_ne!(identity, InstanceIdentity::from_host());
        assert!(identity.as_str().contains("_Cli_"));
    }

    #[test]
    fn test_cli_identity_honours_configured_id() {
        let settings = CacheSettings {
            instance_id: Some("ops_Process_000001".to_string()),
            ..CacheSettings::default()
        };
        assert_eq!(cli_identity(&settings).as_str(), "ops_Process_000001");
    }
}
