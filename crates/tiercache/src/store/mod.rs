//! Remote store transports.
//!
//! [`RemoteStore`] is the narrow set of primitives the caching layer needs from
//! a networked key/value store: TTL blobs, string sets and glob-pattern
//! pub/sub. Two implementations are provided:
//!
//! - [`RedisStore`]: deadpool-managed Redis connections
//! - [`MemoryStore`]: in-process transport for single-process deployments
//!   and multi-node tests

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// A message delivered to a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of messages for one pattern subscription.
///
/// The stream ends when the underlying connection is lost.
pub type MessageStream = BoxStream<'static, InboundMessage>;

/// Remote key/value store with pub/sub.
///
/// Every failure (connection, timeout) is reported as
/// [`CacheError::StoreUnavailable`](crate::CacheError::StoreUnavailable),
/// except missing connection settings which are a configuration error.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a blob. `None` means no expiry.
    async fn set(&self, key: &str, payload: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Delete a key of any kind. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Subscribe to every channel matching a glob pattern (`*`, `?`).
    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream>;
}

/// Redis-style glob match supporting `*`, `?` and `\` escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some('\\') if pattern.get(p + 1) == Some(&text[t]) => {
                p += 2;
                t += 1;
                continue;
            }
            Some(c) if *c != '\\' && *c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        // Backtrack to the last star and let it swallow one more char
        match star {
            Some((star_p, star_t)) => {
                p = star_p + 1;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
