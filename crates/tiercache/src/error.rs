use thiserror::Error;

/// Errors produced by the caching layer.
///
/// Everything below [`SmartCache`](crate::SmartCache) reports failures through
/// this type; the orchestrator itself degrades every variant except
/// `Configuration` to a cache miss.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Missing or invalid connection settings. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network failure or timeout talking to the remote store.
    #[error("Remote store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored payload could not be reconstructed.
    #[error("Corrupt cache entry for key {key}: {message}")]
    DecodeFailure { key: String, message: String },

    /// A value or invalidation message could not be encoded; `key` names the
    /// cache key or channel.
    #[error("Failed to encode {key}: {message}")]
    EncodeFailure { key: String, message: String },

    /// Unexpected pub/sub payload or channel.
    #[error("Malformed invalidation message on {channel}: {reason}")]
    MalformedMessage { channel: String, reason: String },

    /// Stored value cannot be converted to the requested shape.
    #[error("Cannot convert cached {found} into {expected}")]
    Conversion {
        expected: &'static str,
        found: &'static str,
    },
}

impl CacheError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    pub fn decode_failure(key: impl Into<String>, message: impl ToString) -> Self {
        Self::DecodeFailure {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn encode_failure(key: impl Into<String>, message: impl ToString) -> Self {
        Self::EncodeFailure {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn malformed(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    pub fn conversion(expected: &'static str, found: &'static str) -> Self {
        Self::Conversion { expected, found }
    }

    /// Whether the orchestrator may treat this error as a plain miss.
    pub fn is_degradable(&self) -> bool {
        !matches!(self, CacheError::Configuration(_))
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        CacheError::StoreUnavailable(format!("failed to get Redis connection: {e}"))
    }
}

impl From<deadpool_redis::redis::RedisError> for CacheError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        CacheError::StoreUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Three-way outcome of a tier read.
///
/// Keeps "not cached", "cached" and "could not tell" apart so callers decide
/// explicitly how to degrade.
#[derive(Debug)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
    Failed(CacheError),
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }

    /// Collapse to an `Option`, discarding the failure.
    pub fn hit(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Failed(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Hit(value) => Lookup::Hit(f(value)),
            Lookup::Miss => Lookup::Miss,
            Lookup::Failed(e) => Lookup::Failed(e),
        }
    }
}

impl<T> From<Result<Option<T>>> for Lookup<T> {
    fn from(result: Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Lookup::Hit(value),
            Ok(None) => Lookup::Miss,
            Err(e) => Lookup::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::store_unavailable("connection refused");
        assert_eq!(
            error.to_string(),
            "Remote store unavailable: connection refused"
        );

        let error = CacheError::decode_failure("ECM_1.key", "invalid marker");
        assert!(error.to_string().contains("ECM_1.key"));

        let error = CacheError::conversion("i32", "text");
        assert_eq!(error.to_string(), "Cannot convert cached text into i32");
    }

    #[test]
    fn test_degradable_classification() {
        assert!(CacheError::store_unavailable("timeout").is_degradable());
        assert!(CacheError::decode_failure("k", "bad").is_degradable());
        assert!(CacheError::conversion("bool", "float").is_degradable());
        assert!(!CacheError::configuration("empty url").is_degradable());
    }

    #[test]
    fn test_lookup_from_result() {
        let hit: Lookup<u8> = Ok(Some(1)).into();
        assert!(hit.is_hit());

        let miss: Lookup<u8> = Ok(None).into();
        assert!(miss.is_miss());

        let failed: Lookup<u8> = Err(CacheError::store_unavailable("down")).into();
        assert!(matches!(failed, Lookup::Failed(CacheError::StoreUnavailable(_))));
        assert_eq!(Lookup::Hit(3).map(|v| v * 2).hit(), Some(6));
    }
}
