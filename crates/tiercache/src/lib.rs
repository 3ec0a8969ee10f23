//! Two-tier cache shared by many application nodes.
//!
//! Keys carrying the distributed tag (`ECM_` by default) live in a shared
//! remote store; every other key lives in a per-process local tier. Writes and
//! removals on one node reach the local tier of every other node through
//! pub/sub invalidation messages, which receivers apply without re-publishing.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use tiercache::{CacheNode, CacheSettings, RequestScope, ResolveOptions, cache_time};
//!
//! # async fn run() -> tiercache::Result<()> {
//! let node = CacheNode::connect(&CacheSettings::default())?;
//! let mut scope = RequestScope::new();
//!
//! let options = ResolveOptions::new()
//!     .ttl(cache_time::FIFTEEN_MINUTES)
//!     .request_scope();
//! let name: String = node
//!     .cache()
//!     .resolve("ECM_42.customer_name", &options, Some(&mut scope), || async {
//!         Ok::<_, Infallible>(Some("alice".to_string()))
//!     })
//!     .await
//!     .unwrap_or_default();
//!
//! node.cache().remove("ECM_42.customer_name").await?;
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod local;
pub mod node;
pub mod observability;
pub mod remote;
pub mod scope;
pub mod smart;
pub mod store;
pub mod value;

pub use config::CacheSettings;
pub use error::{CacheError, Lookup, Result};
pub use invalidation::{BusState, InstanceIdentity, InvalidationBus, InvalidationMessage};
pub use key::KeyNamespace;
pub use local::{DashMapLocalCache, LocalCache};
pub use node::CacheNode;
pub use remote::RemoteCacheClient;
pub use scope::RequestScope;
pub use smart::{ResolveOptions, SessionKey, SmartCache, cache_time};
pub use store::{InboundMessage, MemoryStore, RedisStore, RemoteStore};
pub use value::{CacheValue, Cacheable, Json};
