//! Resolve-or-populate orchestration across the request scope and both tiers.
//!
//! ## Resolve
//!
//! ```text
//! key ─▶ prefixed(key, force_distributed)
//!         │
//!         ├─ request scope hit? ──────────────▶ return
//!         ├─ owning tier hit? (local | remote) ─▶ scope ◀ value, return
//!         └─ producer()
//!              ├─ Some(v) + ttl ─▶ owning tier ◀ v   (no publish)
//!              └─ None + force_update ─▶ remove(key)  (publishes Remove)
//! ```
//!
//! Cache failures never reach the caller of `resolve`: an unreachable store, a
//! corrupt payload or a value of the wrong shape is logged and handled as a
//! miss. Producer errors are returned unchanged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CacheError, Lookup, Result};
use crate::invalidation::InstanceIdentity;
use crate::key::KeyNamespace;
use crate::local::LocalCache;
use crate::remote::RemoteCacheClient;
use crate::scope::RequestScope;
use crate::value::{CacheValue, Cacheable, convert};

/// Common cache lifetimes.
pub mod cache_time {
    use std::time::Duration;

    pub const ONE_MINUTE: Duration = Duration::from_secs(60);
    pub const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
    pub const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);
    pub const SIXTY_MINUTES: Duration = Duration::from_secs(60 * 60);
}

/// Lifetime of session-style entries.
pub const SESSION_TTL: Duration = cache_time::SIXTY_MINUTES;

/// Per-call behaviour of [`SmartCache::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Lifetime of a produced value; `None` leaves the tiers untouched.
    pub ttl: Option<Duration>,
    pub use_request_scope: bool,
    /// Skip every read and always call the producer.
    pub force_update: bool,
    /// Route through the remote tier even without the distributed tag.
    pub force_distributed: bool,
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn request_scope(mut self) -> Self {
        self.use_request_scope = true;
        self
    }

    pub fn force_update(mut self) -> Self {
        self.force_update = true;
        self
    }

    pub fn force_distributed(mut self) -> Self {
        self.force_distributed = true;
        self
    }
}

/// Address of a session-style entry, see [`KeyNamespace::session_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub base_scope_id: i64,
    pub category: String,
    pub key: String,
    pub portal_guid: String,
    pub username: String,
}

impl SessionKey {
    pub fn new(
        base_scope_id: i64,
        category: impl Into<String>,
        key: impl Into<String>,
        portal_guid: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            base_scope_id,
            category: category.into(),
            key: key.into(),
            portal_guid: portal_guid.into(),
            username: username.into(),
        }
    }
}

/// Single call surface for application code.
pub struct SmartCache {
    namespace: KeyNamespace,
    local: Arc<dyn LocalCache>,
    remote: Arc<RemoteCacheClient>,
    local_default_ttl: Option<Duration>,
}

impl SmartCache {
    pub fn new(
        namespace: KeyNamespace,
        local: Arc<dyn LocalCache>,
        remote: Arc<RemoteCacheClient>,
        local_default_ttl: Option<Duration>,
    ) -> Self {
        Self {
            namespace,
            local,
            remote,
            local_default_ttl,
        }
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn local(&self) -> &Arc<dyn LocalCache> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<RemoteCacheClient> {
        &self.remote
    }

    pub fn identity(&self) -> &InstanceIdentity {
        self.remote.identity()
    }

    /// Resolve `key` from the request scope or the owning tier, calling
    /// `producer` on a miss (or always with `force_update`).
    ///
    /// An absent value resolves to `T::default()`.
    pub async fn resolve<T, F, Fut, E>(
        &self,
        key: &str,
        options: &ResolveOptions,
        mut scope: Option<&mut RequestScope>,
        producer: F,
    ) -> std::result::Result<T, E>
    where
        T: Cacheable + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        let key = self.namespace.prefixed(key, options.force_distributed);
        let use_scope = options.use_request_scope;

        if !options.force_update {
            if use_scope {
                if let Some(value) = scope.as_deref().and_then(|s| s.get(&key)).cloned() {
                    match convert::<T>(Some(value)) {
                        Ok(resolved) => {
                            tracing::debug!(key = %key, "request scope hit");
                            return Ok(resolved);
                        }
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "request scope value unusable, treating as miss");
                        }
                    }
                }
            }

            if let Some(value) = self.read_tier(&key).await {
                match convert::<T>(Some(value.clone())) {
                    Ok(resolved) => {
                        if use_scope && !value.is_null() {
                            if let Some(scope) = scope.as_deref_mut() {
                                scope.insert(key.clone(), value);
                            }
                        }
                        return Ok(resolved);
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "cached value unusable, treating as miss");
                    }
                }
            }
        }

        let produced = producer().await?;
        let value = produced
            .clone()
            .map(T::into_cache_value)
            .filter(|v| !v.is_null());

        match &value {
            Some(value) => {
                if let Some(ttl) = options.ttl {
                    self.write_tier(&key, value, ttl).await;
                }
            }
            None if options.force_update => {
                if let Some(scope) = scope.as_deref_mut() {
                    scope.remove(&key);
                }
                if let Err(e) = self.remove(&key).await {
                    tracing::warn!(key = %key, error = %e, "failed to delete key on forced update");
                }
            }
            None => {}
        }

        if use_scope {
            if let (Some(scope), Some(value)) = (scope.as_deref_mut(), value) {
                scope.insert(key, value);
            }
        }

        Ok(produced.unwrap_or_default())
    }

    /// Resolve a session-style entry: 60 minute TTL, distributed, request scoped.
    pub async fn session_get<T, F, Fut, E>(
        &self,
        session: &SessionKey,
        scope: Option<&mut RequestScope>,
        producer: F,
    ) -> std::result::Result<T, E>
    where
        T: Cacheable + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        let key = self.session_key(session);
        let options = ResolveOptions::new()
            .ttl(SESSION_TTL)
            .force_distributed()
            .request_scope();
        self.resolve(&key, &options, scope, producer).await
    }

    /// Same as [`session_get`](Self::session_get) but always calls the producer.
    pub async fn session_set<T, F, Fut, E>(
        &self,
        session: &SessionKey,
        scope: Option<&mut RequestScope>,
        producer: F,
    ) -> std::result::Result<T, E>
    where
        T: Cacheable + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        let key = self.session_key(session);
        let options = ResolveOptions::new()
            .ttl(SESSION_TTL)
            .force_distributed()
            .request_scope()
            .force_update();
        self.resolve(&key, &options, scope, producer).await
    }

    fn session_key(&self, session: &SessionKey) -> String {
        self.namespace.session_key(
            session.base_scope_id,
            &session.category,
            &session.key,
            &session.portal_guid,
            &session.username,
        )
    }

    /// Three-way read of the owning tier.
    pub async fn get<T: Cacheable>(&self, key: &str) -> Lookup<T> {
        let lookup = if self.namespace.is_distributed(key) {
            self.remote.get(key).await
        } else {
            match self.local.get(key).await {
                Some(value) => Lookup::Hit(value),
                None => Lookup::Miss,
            }
        };

        match lookup {
            Lookup::Hit(value) => match convert::<T>(Some(value)) {
                Ok(resolved) => Lookup::Hit(resolved),
                Err(e) => Lookup::Failed(e),
            },
            Lookup::Miss => Lookup::Miss,
            Lookup::Failed(e) => Lookup::Failed(e),
        }
    }

    /// Store a value in the owning tier without notifying other nodes.
    ///
    /// Local entries written without a TTL get the configured local default.
    /// A null value deletes the key instead.
    pub async fn insert<T: Cacheable>(&self, key: &str, value: T, ttl: Option<Duration>) -> Result<()> {
        let value = value.into_cache_value();
        if value.is_null() {
            self.local.remove_one(key).await;
            if self.namespace.is_distributed(key) {
                self.remote.del(key).await?;
            }
            return Ok(());
        }
        if self.namespace.is_distributed(key) {
            self.remote.set(key, &value, ttl).await
        } else {
            self.local
                .set(key, value, ttl.or(self.local_default_ttl))
                .await;
            Ok(())
        }
    }

    /// Remove a key here and on every other node.
    ///
    /// Distributed keys are also deleted from the remote store. Exactly one
    /// Remove message is published.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.local.remove_one(key).await;
        if self.namespace.is_distributed(key) {
            self.remote.del(key).await?;
        }
        self.remote.publish_remove(key).await?;
        tracing::debug!(key = %key, "cache key removed");
        Ok(())
    }

    /// Flush matching local entries here and on every other node.
    pub async fn clear(&self, kind: &str, data: &str) -> Result<usize> {
        self.remote.check_clear(kind, data)?;
        let removed = self.local.remove_matching(kind, data).await;
        self.remote.publish_clear(kind, data).await?;
        tracing::debug!(kind = %kind, data = %data, removed, "cache cleared");
        Ok(removed)
    }

    /// Remove every key listed in a scope's advisory index, then drop the index.
    pub async fn clear_scope(&self, scope: &str) -> Result<usize> {
        let keys = self.remote.keys_for_scope(scope).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        for key in &keys {
            self.remove(key).await?;
        }
        self.remote.drop_scope_index(scope).await?;

        tracing::info!(scope = %scope, count = keys.len(), "scope cleared");
        Ok(keys.len())
    }

    pub async fn keys_for_scope(&self, scope: &str) -> Result<Vec<String>> {
        self.remote.keys_for_scope(scope).await
    }

    pub async fn direct_get(&self, key: &str) -> Result<Option<String>> {
        self.remote.direct_get(key).await
    }

    pub async fn direct_set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.remote.direct_set(key, value, ttl).await
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.remote.set_members(key).await
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.remote.publish(channel, message).await
    }

    /// Owning-tier read with every failure degraded to a miss.
    ///
    /// A stored null counts as absent.
    async fn read_tier(&self, key: &str) -> Option<CacheValue> {
        let value = if self.namespace.is_distributed(key) {
            match self.remote.get(key).await {
                Lookup::Hit(value) => Some(value),
                Lookup::Miss => None,
                Lookup::Failed(e) => {
                    log_tier_failure(key, "read", &e);
                    None
                }
            }
        } else {
            self.local.get(key).await
        };
        value.filter(|v| !v.is_null())
    }

    /// Owning-tier write; failures are logged and ignored.
    async fn write_tier(&self, key: &str, value: &CacheValue, ttl: Duration) {
        if self.namespace.is_distributed(key) {
            if let Err(e) = self.remote.set(key, value, Some(ttl)).await {
                log_tier_failure(key, "write", &e);
            }
        } else {
            self.local.set(key, value.clone(), Some(ttl)).await;
        }
    }
}

fn log_tier_failure(key: &str, op: &str, e: &CacheError) {
    if e.is_degradable() {
        tracing::warn!(key = %key, error = %e, "remote cache {op} failed, treating as miss");
    } else {
        tracing::error!(key = %key, error = %e, "remote cache {op} failed on misconfigured store");
    }
}
