use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::key::DEFAULT_DISTRIBUTED_TAG;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub redis: RedisConfig,
    /// Namespace of the invalidation channels (`<key_prefix>Redis.Clear`)
    /// and of directly addressed sets.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Leading tag that routes a key through the remote tier.
    #[serde(default = "default_distributed_tag")]
    pub distributed_tag: String,
    /// Overrides the host-derived instance identity.
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub local: LocalConfig,
    /// Lifetime of the per-scope key index, refreshed on every write.
    #[serde(default = "default_scope_index_ttl_secs")]
    pub scope_index_ttl_secs: u64,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            key_prefix: default_key_prefix(),
            distributed_tag: default_distributed_tag(),
            instance_id: None,
            local: LocalConfig::default(),
            scope_index_ttl_secs: default_scope_index_ttl_secs(),
            listener: ListenerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_key_prefix() -> String {
    "1.0".to_string()
}

fn default_distributed_tag() -> String {
    DEFAULT_DISTRIBUTED_TAG.to_string()
}

fn default_scope_index_ttl_secs() -> u64 {
    86_400
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.redis.url.trim().is_empty() {
            return Err("redis.url must not be empty".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.redis.timeout_ms == 0 {
            return Err("redis.timeout_ms must be > 0".into());
        }
        if self.distributed_tag.is_empty() {
            return Err("distributed_tag must not be empty".into());
        }
        if self
            .instance_id
            .as_deref()
            .is_some_and(|id| id.is_empty() || id.contains(':'))
        {
            return Err("instance_id must be non-empty and must not contain ':'".into());
        }
        if self.scope_index_ttl_secs == 0 {
            return Err("scope_index_ttl_secs must be > 0".into());
        }
        if self.listener.initial_backoff_ms == 0
            || self.listener.initial_backoff_ms > self.listener.max_backoff_ms
        {
            return Err(
                "listener.initial_backoff_ms must be > 0 and <= listener.max_backoff_ms".into(),
            );
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn scope_index_ttl(&self) -> Duration {
        Duration::from_secs(self.scope_index_ttl_secs)
    }
}

/// Remote store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Per-command and connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Process-local tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// TTL applied to local entries written without one; 0 keeps them until evicted
    #[serde(default = "default_local_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Interval of the expired-entry sweep
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_local_ttl_secs() -> u64 {
    0
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_local_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl LocalConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }
}

/// Invalidation listener reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    300_000 // 5 minutes
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ListenerConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::CacheSettings;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default settings file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "tiercache.toml";

    /// Load settings from an optional TOML file plus `TIERCACHE__*`
    /// environment overrides, then validate them.
    pub fn load_settings(path: Option<&str>) -> Result<CacheSettings, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(format!("config file not found: {p}"));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., TIERCACHE__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("TIERCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: CacheSettings = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = CacheSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.key_prefix, "1.0");
        assert_eq!(settings.distributed_tag, "ECM_");
        assert!(settings.local.default_ttl().is_none());
        assert_eq!(settings.listener.max_backoff(), Duration::from_secs(300));
    }

    #[test]
    fn test_empty_url_rejected() {
        let mut settings = CacheSettings::default();
        settings.redis.url = "  ".into();
        assert!(settings.validate().unwrap_err().contains("redis.url"));
    }

    #[test]
    fn test_instance_id_with_colon_rejected() {
        let mut settings = CacheSettings::default();
        settings.instance_id = Some("host:1".into());
        assert!(settings.validate().is_err());

        settings.instance_id = Some("host1_Process_000000".into());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
key_prefix = "2.0"
instance_id = "node-a"

[redis]
url = "redis://cache:6380"
timeout_ms = 250

[local]
default_ttl_secs = 30
"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let settings = loader::load_settings(Some(&path)).unwrap();

        assert_eq!(settings.key_prefix, "2.0");
        assert_eq!(settings.instance_id.as_deref(), Some("node-a"));
        assert_eq!(settings.redis.url, "redis://cache:6380");
        assert_eq!(settings.redis.timeout(), Duration::from_millis(250));
        assert_eq!(settings.redis.pool_size, 10);
        assert_eq!(settings.local.default_ttl(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = loader::load_settings(Some("/nonexistent/tiercache.toml")).unwrap_err();
        assert!(err.contains("not found"));
    }
}
